//! Control to audio parameter delivery.
//!
//! One triple buffer per node carries a coalesced map of the latest value
//! submitted for every `(filter_name, key)` pair the control bridge has
//! written. A node drains its slice at the top of `process`. Because a
//! later write to the same key simply overwrites the map entry before the
//! next publish, overflow can only ever drop a stale value for that same
//! key (drop-oldest-per-key) — it never reorders updates to distinct keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::triple_buffer::TripleBufferHandle;

/// One coalesced parameter update, keyed by filter name + parameter key.
pub type ParamMap = HashMap<(String, String), f64>;

/// The producer side, held by the control bridge. Cloneable; every clone
/// writes into the same underlying triple buffer.
///
/// The triple buffer's back slot rotates two generations behind the
/// front on every publish, so it cannot be mutated in place across calls
/// without losing whichever keys last lived in that slot. The writer
/// instead keeps its own accumulated map under a mutex and publishes a
/// full snapshot on every `submit`, which is what actually makes the
/// coalescing (and drop-oldest-per-key overflow policy) correct.
#[derive(Clone)]
pub struct ParamQueueWriter {
    buffer: TripleBufferHandle<ParamMap>,
    accumulated: Arc<Mutex<ParamMap>>,
}

impl ParamQueueWriter {
    /// Submit or overwrite the value for `(filter_name, key)`. Submission
    /// order for a single key is preserved because each call inserts into
    /// the same accumulated map before the whole map is republished.
    pub fn submit(&self, filter_name: &str, key: &str, value: f64) {
        let mut map = self.accumulated.lock().unwrap();
        map.insert((filter_name.to_string(), key.to_string()), value);
        self.buffer.write(map.clone());
    }
}

/// The consumer side, held by a node. Drains the latest coalesced map on
/// every `process` call; each key is delivered exactly once per drain.
pub struct ParamQueueReader {
    buffer: TripleBufferHandle<ParamMap>,
    last_seen: ParamMap,
}

impl ParamQueueReader {
    /// Take every `(filter_name, key, value)` that changed since the last
    /// drain, in arbitrary order across keys but never reordering a single
    /// key's latest value (there is only ever one outstanding value per key
    /// by construction).
    pub fn drain(&mut self) -> Vec<(String, String, f64)> {
        let mut updates = Vec::new();
        let last_seen = &mut self.last_seen;
        self.buffer.with(|current| {
            for (k, v) in current.iter() {
                if last_seen.get(k) != Some(v) {
                    updates.push((k.0.clone(), k.1.clone(), *v));
                    last_seen.insert(k.clone(), *v);
                }
            }
        });
        updates
    }
}

/// Construct a writer/reader pair backed by one triple buffer, allocated by
/// the graph when a node is added.
pub fn param_queue() -> (ParamQueueWriter, ParamQueueReader) {
    let buffer = TripleBufferHandle::new();
    (
        ParamQueueWriter {
            buffer: buffer.clone(),
            accumulated: Arc::new(Mutex::new(ParamMap::new())),
        },
        ParamQueueReader {
            buffer,
            last_seen: ParamMap::new(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_write_to_same_key_wins_and_drains_once() {
        let (writer, mut reader) = param_queue();
        writer.submit("eq", "gain", 1.0);
        writer.submit("eq", "gain", 2.0);
        writer.submit("eq", "gain", -2.0);
        let updates = reader.drain();
        assert_eq!(updates, vec![("eq".to_string(), "gain".to_string(), -2.0)]);
    }

    #[test]
    fn distinct_keys_both_delivered() {
        let (writer, mut reader) = param_queue();
        writer.submit("eq", "gain", 1.0);
        writer.submit("eq", "freq", 1000.0);
        let mut updates = reader.drain();
        updates.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            updates,
            vec![
                ("eq".to_string(), "freq".to_string(), 1000.0),
                ("eq".to_string(), "gain".to_string(), 1.0),
            ]
        );
    }

    #[test]
    fn unchanged_value_is_not_redelivered() {
        let (writer, mut reader) = param_queue();
        writer.submit("eq", "gain", 1.0);
        assert_eq!(reader.drain().len(), 1);
        assert_eq!(reader.drain().len(), 0);
        writer.submit("eq", "gain", 1.0);
        assert_eq!(reader.drain().len(), 0, "identical resubmission is not a change");
    }
}
