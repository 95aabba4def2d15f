//! The OSC address → (node, filter, key) registry.
//!
//! A separate concern from `patchbay_osc::Dispatcher`'s pattern-based method
//! registry: here every entry is a literal, fully-resolved address (e.g.
//! `/filter/eq/gain`) mapping directly to the graph target it controls, so
//! resolving an incoming message is a single hash lookup rather than a
//! pattern scan.

use std::collections::HashMap;
use std::sync::RwLock;

/// Where a resolved control message should be delivered: the graph node
/// that owns the filter, the filter's own name inside that node's chain,
/// and the parameter key within the filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControlTarget {
    pub node_name: String,
    pub filter_name: String,
    pub key: String,
}

impl ControlTarget {
    pub fn new(node_name: impl Into<String>, filter_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            filter_name: filter_name.into(),
            key: key.into(),
        }
    }
}

/// Maps literal OSC addresses to their control target. Reader-writer
/// locked like the dispatcher's own method registry, since registration
/// happens at setup time and resolution happens on every incoming message.
#[derive(Default)]
pub struct Registry {
    routes: RwLock<HashMap<String, ControlTarget>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address` (e.g. `/filter/eq/gain`) as controlling `target`.
    /// Re-registering the same address overwrites the prior target.
    pub fn register(&self, address: impl Into<String>, target: ControlTarget) {
        self.routes.write().unwrap().insert(address.into(), target);
    }

    pub fn unregister(&self, address: &str) {
        self.routes.write().unwrap().remove(address);
    }

    /// Resolve an incoming message's address to its control target, if any
    /// was registered.
    pub fn resolve(&self, address: &str) -> Option<ControlTarget> {
        self.routes.read().unwrap().get(address).cloned()
    }

    /// Build the conventional `/filter/<node>/<key>` address for a target
    /// whose filter name equals its node name (the common case where a
    /// graph node hosts exactly one named filter), used by callers that
    /// want to register without hand-building the address string.
    pub fn conventional_address(node_name: &str, key: &str) -> String {
        format!("/filter/{node_name}/{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_address() {
        let registry = Registry::new();
        registry.register("/filter/eq/gain", ControlTarget::new("eq", "eq", "gain"));
        assert_eq!(
            registry.resolve("/filter/eq/gain"),
            Some(ControlTarget::new("eq", "eq", "gain"))
        );
    }

    #[test]
    fn unregistered_address_resolves_to_none() {
        let registry = Registry::new();
        assert_eq!(registry.resolve("/filter/eq/gain"), None);
    }

    #[test]
    fn reregistration_overwrites_prior_target() {
        let registry = Registry::new();
        registry.register("/filter/eq/gain", ControlTarget::new("eq", "eq", "gain"));
        registry.register("/filter/eq/gain", ControlTarget::new("eq2", "eq2", "gain"));
        assert_eq!(
            registry.resolve("/filter/eq/gain"),
            Some(ControlTarget::new("eq2", "eq2", "gain"))
        );
    }
}
