//! The control bridge: wires the OSC dispatcher to the graph's parameter
//! queues through the registry, and mirrors commands outward to an
//! external mixing console over a second transport. The bridge owns no
//! audio state and never calls into nodes directly, it only enqueues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use patchbay_graph::ParamQueueWriter;
use patchbay_osc::dispatcher::HandlerError;
use patchbay_osc::{Dispatcher, OscMessage, OscPacket, OscValue, Transport};
use patchbay_types::{ErrorKind, PatchbayError};

use crate::registry::Registry;

fn coerce_f64(value: &OscValue) -> Option<f64> {
    match value {
        OscValue::Double(v) => Some(*v),
        OscValue::Float32(v) => Some(*v as f64),
        OscValue::Int32(v) => Some(*v as f64),
        OscValue::Int64(v) => Some(*v as f64),
        _ => None,
    }
}

/// The pattern every `/filter/<node>/<key>`-shaped control address matches.
/// The registry resolves the full concrete address to its target; the
/// wildcard here only decides which messages reach that resolution step.
const CONTROL_PATTERN: &str = "/filter/*/*";

/// Translates OSC messages into graph parameter updates and mirrors
/// commands outward to an external console.
pub struct ControlBridge {
    registry: Arc<Registry>,
    writers: RwLock<HashMap<String, ParamQueueWriter>>,
    console: Mutex<Option<Box<dyn Transport>>>,
}

impl ControlBridge {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            writers: RwLock::new(HashMap::new()),
            console: Mutex::new(None),
        }
    }

    /// Give the bridge the parameter-submission handle for a graph node, so
    /// an incoming control message addressed to that node can be enqueued
    /// without the bridge ever touching the `Graph` itself.
    pub fn register_node(&self, node_name: impl Into<String>, writer: ParamQueueWriter) {
        self.writers.write().unwrap().insert(node_name.into(), writer);
    }

    /// Attach the transport used to mirror commands to the external mixing
    /// console, a separate outbound address from the engine's own listen
    /// socket.
    pub fn set_console_transport(&self, transport: Box<dyn Transport>) {
        *self.console.lock().unwrap() = Some(transport);
    }

    /// Register this bridge's handler on `dispatcher` so every message
    /// under `/filter/.../...` is resolved through the registry and
    /// enqueued onto the matching node's parameter queue.
    pub fn install(self: &Arc<Self>, dispatcher: &Dispatcher) -> Result<(), PatchbayError> {
        let bridge = Arc::clone(self);
        dispatcher.add_method(
            CONTROL_PATTERN,
            None,
            Box::new(move |msg: &OscMessage| bridge.handle_control_message(msg)),
        )?;
        Ok(())
    }

    fn handle_control_message(&self, msg: &OscMessage) -> Result<(), HandlerError> {
        let target = self
            .registry
            .resolve(&msg.address)
            .ok_or_else(|| HandlerError(format!("no control route registered for '{}'", msg.address)))?;

        let value = msg
            .args
            .first()
            .and_then(coerce_f64)
            .ok_or_else(|| HandlerError(format!("'{}' expects one numeric argument", msg.address)))?;

        let writer = self
            .writers
            .read()
            .unwrap()
            .get(&target.node_name)
            .cloned()
            .ok_or_else(|| HandlerError(format!("node '{}' has no registered parameter queue", target.node_name)))?;

        writer.submit(&target.filter_name, &target.key, value);
        Ok(())
    }

    /// Mirror a command outward to the external console at the address
    /// this bridge was configured with. Outgoing commands use the same
    /// address mapping as incoming control messages but a separate
    /// outbound transport.
    pub fn mirror_to_console(&self, address: impl Into<String>, value: f64) -> Result<(), PatchbayError> {
        let mut guard = self.console.lock().unwrap();
        let transport = guard.as_mut().ok_or_else(|| {
            PatchbayError::new(ErrorKind::ConfigError, "no console transport configured")
        })?;
        let packet = OscPacket::Message(OscMessage::new(address, vec![OscValue::Double(value)]));
        let bytes = patchbay_osc::encode_packet(&packet)?;
        transport.send(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ControlTarget;
    use patchbay_graph::param_queue;
    use patchbay_osc::Dispatcher;

    #[test]
    fn resolved_message_reaches_the_registered_queue() {
        let registry = Arc::new(Registry::new());
        registry.register("/filter/eq/gain", ControlTarget::new("eq", "eq", "gain"));
        let bridge = Arc::new(ControlBridge::new(registry));
        let (writer, mut reader) = param_queue();
        bridge.register_node("eq", writer);

        let dispatcher = Dispatcher::new();
        bridge.install(&dispatcher).unwrap();

        dispatcher.dispatch_message(&OscMessage::new("/filter/eq/gain", vec![OscValue::Float32(-2.0)]));
        let updates = reader.drain();
        assert_eq!(updates, vec![("eq".to_string(), "gain".to_string(), -2.0f64)]);
    }

    #[test]
    fn unresolved_address_is_reported_not_panicked() {
        let registry = Arc::new(Registry::new());
        let bridge = Arc::new(ControlBridge::new(registry));
        let dispatcher = Dispatcher::new();
        bridge.install(&dispatcher).unwrap();

        let reported = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let r = reported.clone();
        dispatcher.set_error_handler(Box::new(move |event| {
            if event.kind == ErrorKind::RuntimeError {
                r.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }));
        dispatcher.dispatch_message(&OscMessage::new("/filter/missing/gain", vec![OscValue::Float32(1.0)]));
        assert_eq!(reported.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn last_of_many_rapid_updates_wins() {
        let registry = Arc::new(Registry::new());
        registry.register("/filter/eq/gain", ControlTarget::new("eq", "eq", "gain"));
        let bridge = Arc::new(ControlBridge::new(registry));
        let (writer, mut reader) = param_queue();
        bridge.register_node("eq", writer);

        let dispatcher = Dispatcher::new();
        bridge.install(&dispatcher).unwrap();

        for i in 0..100 {
            dispatcher.dispatch_message(&OscMessage::new(
                "/filter/eq/gain",
                vec![OscValue::Float32(i as f32 * -0.02)],
            ));
        }
        let updates = reader.drain();
        assert_eq!(updates.len(), 1);
        assert!((updates[0].2 - (-1.98)).abs() < 1e-4);
    }
}
