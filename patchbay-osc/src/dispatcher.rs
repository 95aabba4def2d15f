//! Method registry and dispatch: a single reader-writer-locked registry,
//! pattern matching against registered address patterns, type coercion
//! before a handler is invoked, default-method fallback, and bundle
//! start/end hooks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use patchbay_types::{ErrorEvent, ErrorHandler, ErrorKind, MethodId, PatchbayError};

use crate::pattern::{matches, validate_pattern};
use crate::value::{OscMessage, OscPacket, OscValue};

/// Error returned by a method handler. Handlers never panic across the
/// dispatch boundary; they report through this type instead,
/// and dispatch continues to the next matching method.
#[derive(Debug, Clone)]
pub struct HandlerError(pub String);

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered method handler.
pub type Handler = Box<dyn Fn(&OscMessage) -> Result<(), HandlerError> + Send + Sync>;

/// Invoked once before/after a bundle's elements are dispatched. Nested
/// bundles recurse with the same protocol.
pub type BundleHook = Box<dyn Fn(crate::timetag::Timetag) + Send + Sync>;
pub type BundleEndHook = Box<dyn Fn() + Send + Sync>;

struct Entry {
    id: MethodId,
    pattern: String,
    type_spec: Option<String>,
    handler: Handler,
    is_default: bool,
}

/// The method registry plus error-reporting sink, shared across the server
/// thread(s) that feed it messages.
pub struct Dispatcher {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
    error_handler: RwLock<Option<ErrorHandler>>,
    coercion_enabled: AtomicBool,
    bundle_start: RwLock<Option<BundleHook>>,
    bundle_end: RwLock<Option<BundleEndHook>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            error_handler: RwLock::new(None),
            coercion_enabled: AtomicBool::new(true),
            bundle_start: RwLock::new(None),
            bundle_end: RwLock::new(None),
        }
    }

    /// Install the handler invoked for every propagated error.
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.error_handler.write().unwrap() = Some(handler);
    }

    /// Install the `bundle_start`/`bundle_end` hooks.
    pub fn set_bundle_hooks(&self, start: BundleHook, end: BundleEndHook) {
        *self.bundle_start.write().unwrap() = Some(start);
        *self.bundle_end.write().unwrap() = Some(end);
    }

    /// Enable or disable numeric type coercion; on by default.
    pub fn set_coercion_enabled(&self, enabled: bool) {
        self.coercion_enabled.store(enabled, Ordering::Relaxed);
    }

    fn report(&self, kind: ErrorKind, message: impl Into<String>, origin: &str) {
        let guard = self.error_handler.read().unwrap();
        if let Some(handler) = guard.as_ref() {
            handler(ErrorEvent {
                kind,
                message: message.into(),
                origin: origin.to_string(),
            });
        } else {
            log::warn!("[{origin}] {}: {}", kind, message.into());
        }
    }

    /// Register a handler for `pattern`. `type_spec` of `None` accepts any
    /// argument types; `Some(tags)` requires (with coercion enabled) the
    /// argument list to reconcile against `tags`. Validates the pattern
    /// grammar at registration time; matching itself never errors.
    pub fn add_method(
        &self,
        pattern: impl Into<String>,
        type_spec: Option<&str>,
        handler: Handler,
    ) -> Result<MethodId, PatchbayError> {
        let pattern = pattern.into();
        validate_pattern(&pattern)?;
        let id = MethodId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().unwrap().push(Entry {
            id,
            pattern,
            type_spec: type_spec.map(|s| s.to_string()),
            handler,
            is_default: false,
        });
        Ok(id)
    }

    /// Register a default handler, invoked only when no non-default method
    /// matched a message.
    pub fn add_default_method(&self, handler: Handler) -> MethodId {
        let id = MethodId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().unwrap().push(Entry {
            id,
            pattern: String::new(),
            type_spec: None,
            handler,
            is_default: true,
        });
        id
    }

    /// Remove a previously registered method.
    pub fn remove_method(&self, id: MethodId) {
        self.entries.write().unwrap().retain(|e| e.id != id);
    }

    /// Dispatch a single message: every non-default method whose pattern
    /// matches and whose type spec reconciles fires, in registration order;
    /// if none did, every default handler fires instead.
    pub fn dispatch_message(&self, msg: &OscMessage) {
        let entries = self.entries.read().unwrap();
        let coercion = self.coercion_enabled.load(Ordering::Relaxed);
        let mut any_matched = false;

        for entry in entries.iter().filter(|e| !e.is_default) {
            if !matches(&entry.pattern, &msg.address) {
                continue;
            }
            match &entry.type_spec {
                None => {
                    any_matched = true;
                    self.invoke(entry, msg);
                }
                Some(spec) => match reconcile_types(&msg.args, spec, coercion) {
                    Some(reconciled) => {
                        any_matched = true;
                        let reconciled_msg = OscMessage {
                            address: msg.address.clone(),
                            args: reconciled,
                        };
                        self.invoke(entry, &reconciled_msg);
                    }
                    None => {
                        self.report(
                            ErrorKind::TypeMismatch,
                            format!(
                                "argument types did not reconcile against '{spec}' for '{}'",
                                entry.pattern
                            ),
                            &msg.address,
                        );
                    }
                },
            }
        }

        if !any_matched {
            let mut any_default = false;
            for entry in entries.iter().filter(|e| e.is_default) {
                any_default = true;
                self.invoke(entry, msg);
            }
            if !any_default {
                self.report(
                    ErrorKind::AddressError,
                    format!("no method matched address '{}'", msg.address),
                    "dispatcher",
                );
            }
        }
    }

    fn invoke(&self, entry: &Entry, msg: &OscMessage) {
        if let Err(e) = (entry.handler)(msg) {
            self.report(ErrorKind::RuntimeError, e.0, &format!("handler:{}", msg.address));
        }
    }

    /// Dispatch every message reachable from `packet`, recursing through
    /// nested bundles and invoking the bundle hooks around each bundle's
    /// element sweep.
    pub fn dispatch_packet(&self, packet: &OscPacket) {
        match packet {
            OscPacket::Message(msg) => self.dispatch_message(msg),
            OscPacket::Bundle(bundle) => {
                if let Some(hook) = self.bundle_start.read().unwrap().as_ref() {
                    hook(bundle.time_tag);
                }
                for element in &bundle.elements {
                    self.dispatch_packet(element);
                }
                if let Some(hook) = self.bundle_end.read().unwrap().as_ref() {
                    hook();
                }
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Attempt to reconcile `args` against `type_spec`'s tag characters.
/// Returns the (possibly coerced) argument list on success, `None` if the
/// arities differ or any argument fails to reconcile.
fn reconcile_types(args: &[OscValue], type_spec: &str, coercion: bool) -> Option<Vec<OscValue>> {
    let wanted: Vec<char> = type_spec.chars().collect();
    if wanted.len() != args.len() {
        return None;
    }
    let mut out = Vec::with_capacity(args.len());
    for (arg, want) in args.iter().zip(wanted.iter()) {
        out.push(coerce_value(arg, *want, coercion)?);
    }
    Some(out)
}

fn coerce_value(value: &OscValue, want: char, coercion: bool) -> Option<OscValue> {
    if value.type_tag() == Some(want) {
        return Some(value.clone());
    }
    if !coercion {
        return None;
    }
    match (value, want) {
        (OscValue::Int32(v), 'h') => Some(OscValue::Int64(*v as i64)),
        (OscValue::Int32(v), 'f') => Some(OscValue::Float32(*v as f32)),
        (OscValue::Int32(v), 'd') => Some(OscValue::Double(*v as f64)),
        (OscValue::Float32(v), 'd') => Some(OscValue::Double(*v as f64)),
        (OscValue::Float32(v), 'i') => Some(OscValue::Int32(*v as i32)),
        (OscValue::Int64(v), 'd') => Some(OscValue::Double(*v as f64)),
        (OscValue::Int64(v), 'i') => Some(OscValue::Int32(*v as i32)),
        (OscValue::Double(v), 'f') => Some(OscValue::Float32(*v as f32)),
        (OscValue::Double(v), 'h') => Some(OscValue::Int64(*v as i64)),
        (OscValue::True, 'i') => Some(OscValue::Int32(1)),
        (OscValue::False, 'i') => Some(OscValue::Int32(0)),
        _ => None,
    }
}

/// Type-coercion helpers used by handlers that want a specific argument
/// shape without hand-rolling a match on every call.
pub fn coerce_f32(value: &OscValue) -> Option<f32> {
    match value {
        OscValue::Float32(v) => Some(*v),
        OscValue::Double(v) => Some(*v as f32),
        OscValue::Int32(v) => Some(*v as f32),
        OscValue::Int64(v) => Some(*v as f32),
        _ => None,
    }
}

pub fn coerce_i32(value: &OscValue) -> Option<i32> {
    match value {
        OscValue::Int32(v) => Some(*v),
        OscValue::Int64(v) => Some(*v as i32),
        OscValue::Float32(v) => Some(*v as i32),
        OscValue::Double(v) => Some(*v as i32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn matching_methods_all_fire_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        dispatcher
            .add_method(
                "/foo/*",
                None,
                Box::new(move |_msg| {
                    o1.lock().unwrap().push(1);
                    Ok(())
                }),
            )
            .unwrap();

        let o2 = order.clone();
        dispatcher
            .add_method(
                "/foo/bar",
                None,
                Box::new(move |_msg| {
                    o2.lock().unwrap().push(2);
                    Ok(())
                }),
            )
            .unwrap();

        dispatcher.dispatch_message(&OscMessage::new("/foo/bar", vec![]));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn handler_error_does_not_stop_other_handlers() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        dispatcher
            .add_method("/a", None, Box::new(|_| Err(HandlerError("boom".into()))))
            .unwrap();
        let h = hits.clone();
        dispatcher
            .add_method(
                "/a",
                None,
                Box::new(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        dispatcher.dispatch_message(&OscMessage::new("/a", vec![]));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_pattern_is_rejected_at_registration() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .add_method("/foo[", None, Box::new(|_| Ok(())))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PatternError);
    }

    #[test]
    fn default_method_fires_only_when_nothing_else_matched() {
        let dispatcher = Dispatcher::new();
        let specific_hits = Arc::new(AtomicUsize::new(0));
        let default_hits = Arc::new(AtomicUsize::new(0));

        let s = specific_hits.clone();
        dispatcher
            .add_method(
                "/synth/[0-9]/volume",
                None,
                Box::new(move |_| {
                    s.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        let d = default_hits.clone();
        dispatcher.add_default_method(Box::new(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        dispatcher.dispatch_message(&OscMessage::new("/synth/3/volume", vec![OscValue::Float32(0.5)]));
        assert_eq!(specific_hits.load(Ordering::SeqCst), 1);
        assert_eq!(default_hits.load(Ordering::SeqCst), 0);

        dispatcher.dispatch_message(&OscMessage::new("/synth/x/volume", vec![OscValue::Float32(0.5)]));
        assert_eq!(specific_hits.load(Ordering::SeqCst), 1);
        assert_eq!(default_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn type_spec_coerces_numeric_widening_by_default() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let s = seen.clone();
        dispatcher
            .add_method(
                "/gain",
                Some("d"),
                Box::new(move |msg| {
                    *s.lock().unwrap() = msg.args.first().cloned();
                    Ok(())
                }),
            )
            .unwrap();
        dispatcher.dispatch_message(&OscMessage::new("/gain", vec![OscValue::Float32(1.5)]));
        assert_eq!(*seen.lock().unwrap(), Some(OscValue::Double(1.5f32 as f64)));
    }

    #[test]
    fn type_spec_mismatch_is_reported_and_skips_handler() {
        let dispatcher = Dispatcher::new();
        dispatcher.set_coercion_enabled(false);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        dispatcher
            .add_method(
                "/gain",
                Some("i"),
                Box::new(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        let reported = Arc::new(AtomicUsize::new(0));
        let r = reported.clone();
        dispatcher.set_error_handler(Box::new(move |event| {
            if event.kind == ErrorKind::TypeMismatch {
                r.fetch_add(1, Ordering::SeqCst);
            }
        }));
        dispatcher.dispatch_message(&OscMessage::new("/gain", vec![OscValue::Float32(1.5)]));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(reported.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bundle_hooks_fire_around_element_sweep() {
        let dispatcher = Dispatcher::new();
        let trace = Arc::new(std::sync::Mutex::new(Vec::new()));

        let t1 = trace.clone();
        dispatcher.set_bundle_hooks(
            Box::new(move |_tag| t1.lock().unwrap().push("start".to_string())),
            Box::new({
                let t2 = trace.clone();
                move || t2.lock().unwrap().push("end".to_string())
            }),
        );
        let t3 = trace.clone();
        dispatcher
            .add_method(
                "/x",
                None,
                Box::new(move |_| {
                    t3.lock().unwrap().push("handler".to_string());
                    Ok(())
                }),
            )
            .unwrap();

        use crate::timetag::Timetag;
        let bundle = OscPacket::Bundle(crate::value::OscBundle::new(
            Timetag::immediate(),
            vec![OscPacket::Message(OscMessage::new("/x", vec![]))],
        ));
        dispatcher.dispatch_packet(&bundle);
        assert_eq!(*trace.lock().unwrap(), vec!["start", "handler", "end"]);
    }

    #[test]
    fn unmatched_address_is_reported_not_silently_dropped() {
        let dispatcher = Dispatcher::new();
        let reported = Arc::new(AtomicUsize::new(0));
        let r = reported.clone();
        dispatcher.set_error_handler(Box::new(move |event| {
            if event.kind == ErrorKind::AddressError {
                r.fetch_add(1, Ordering::SeqCst);
            }
        }));
        dispatcher.dispatch_message(&OscMessage::new("/nowhere", vec![]));
        assert_eq!(reported.load(Ordering::SeqCst), 1);
    }
}
