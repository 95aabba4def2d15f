//! Bundle scheduling: bundles whose time tag is in the future are held in a
//! min-heap keyed by time tag and released to the dispatcher when due,
//! rather than being dispatched immediately on receipt.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use patchbay_types::{ErrorKind, PatchbayError};

use crate::timetag::Timetag;
use crate::value::OscBundle;

/// Ceiling on the number of pending scheduled bundles, reported via
/// `ScheduleFull` — a misbehaving sender scheduling far-future
/// bundles faster than they drain must not grow this heap unboundedly.
pub const MAX_PENDING: usize = 4096;

struct Scheduled {
    due: Timetag,
    // Monotonic enqueue order, used only to break ties between bundles
    // sharing the same time tag: two bundles due at the same instant must
    // still dispatch in the order they were enqueued.
    sequence: u64,
    bundle: OscBundle,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due).then(self.sequence.cmp(&other.sequence))
    }
}

/// A min-heap of pending bundles, ordered so the earliest-due bundle is
/// always at the top (via `Reverse`, since `BinaryHeap` is a max-heap),
/// with FIFO enqueue order as the tie-breaker for equal time tags.
pub struct Scheduler {
    heap: Mutex<BinaryHeap<Reverse<Scheduled>>>,
    len: AtomicUsize,
    next_sequence: AtomicUsize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            len: AtomicUsize::new(0),
            next_sequence: AtomicUsize::new(0),
        }
    }

    /// Schedule a bundle. Bundles tagged `immediate` should be dispatched
    /// directly by the caller instead of going through the scheduler.
    pub fn schedule(&self, bundle: OscBundle) -> Result<(), PatchbayError> {
        let mut heap = self.heap.lock().unwrap();
        if heap.len() >= MAX_PENDING {
            return Err(PatchbayError::new(
                ErrorKind::ScheduleFull,
                format!("scheduler already holds {MAX_PENDING} pending bundles"),
            ));
        }
        let due = bundle.time_tag;
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) as u64;
        heap.push(Reverse(Scheduled { due, sequence, bundle }));
        self.len.store(heap.len(), Ordering::Relaxed);
        Ok(())
    }

    /// Pop every bundle whose time tag is due at or before `now`.
    pub fn drain_due(&self, now: Timetag) -> Vec<OscBundle> {
        let mut heap = self.heap.lock().unwrap();
        let mut due = Vec::new();
        while let Some(Reverse(top)) = heap.peek() {
            if top.due <= now {
                let Reverse(scheduled) = heap.pop().unwrap();
                due.push(scheduled.bundle);
            } else {
                break;
            }
        }
        self.len.store(heap.len(), Ordering::Relaxed);
        due
    }

    /// The time tag of the next pending bundle, if any — used by the
    /// server loop to size its wait interval.
    pub fn next_due(&self) -> Option<Timetag> {
        self.heap.lock().unwrap().peek().map(|Reverse(s)| s.due)
    }

    pub fn pending_count(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::OscPacket;

    fn bundle_at(seconds: u32) -> OscBundle {
        OscBundle::new(
            Timetag {
                seconds,
                fraction: 0,
            },
            vec![],
        )
    }

    #[test]
    fn drains_only_bundles_due_by_now() {
        let scheduler = Scheduler::new();
        scheduler.schedule(bundle_at(10)).unwrap();
        scheduler.schedule(bundle_at(20)).unwrap();
        scheduler.schedule(bundle_at(5)).unwrap();

        let due = scheduler.drain_due(Timetag {
            seconds: 12,
            fraction: 0,
        });
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].time_tag.seconds, 5);
        assert_eq!(due[1].time_tag.seconds, 10);
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn schedule_full_is_reported() {
        let scheduler = Scheduler::new();
        for i in 0..MAX_PENDING {
            scheduler.schedule(bundle_at(i as u32)).unwrap();
        }
        let err = scheduler.schedule(bundle_at(99999)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ScheduleFull);
    }

    #[test]
    fn next_due_reflects_the_earliest_pending_bundle() {
        let scheduler = Scheduler::new();
        assert!(scheduler.next_due().is_none());
        scheduler.schedule(bundle_at(30)).unwrap();
        scheduler.schedule(bundle_at(10)).unwrap();
        assert_eq!(scheduler.next_due().unwrap().seconds, 10);
        let _ = OscPacket::Bundle(bundle_at(0));
    }

    #[test]
    fn bundles_sharing_a_timetag_drain_in_enqueue_order() {
        use crate::value::{OscMessage, OscValue};

        let bundle_with_marker = |marker: i32| {
            OscBundle::new(
                Timetag { seconds: 10, fraction: 0 },
                vec![OscPacket::Message(OscMessage::new("/m", vec![OscValue::Int32(marker)]))],
            )
        };

        let scheduler = Scheduler::new();
        scheduler.schedule(bundle_with_marker(1)).unwrap();
        scheduler.schedule(bundle_with_marker(2)).unwrap();
        scheduler.schedule(bundle_with_marker(3)).unwrap();

        let due = scheduler.drain_due(Timetag { seconds: 10, fraction: 0 });
        let markers: Vec<i32> = due
            .iter()
            .map(|b| match &b.elements[0] {
                OscPacket::Message(m) => match m.args[0] {
                    OscValue::Int32(n) => n,
                    _ => unreachable!(),
                },
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(markers, vec![1, 2, 3]);
    }
}
