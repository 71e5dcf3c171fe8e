//! Pending-operation bookkeeping.
//!
//! Every outbound command that expects a resolution from the server gets an
//! entry in one of four sequence-keyed tables. The entry owns a [`OneShot`]
//! slot; the awaiting future holds a clone of the same slot, so the table
//! entry can be removed the moment the resolution job arrives without losing
//! the value for the (not yet re-polled) awaiter.
//!
//! Entries canceled in try-cancel or abandon mode stay in their table marked
//! `detached`: the server's late resolution is absorbed silently instead of
//! tripping the unknown-sequence nondeterminism check.

use resolute_types::activation::{ActivityResolution, ChildStartOutcome, ChildWorkflowResolution};
use resolute_types::{ActivityCancellationType, Failure, Seq};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A one-shot completion slot shared between a pending-op table entry and the
/// future awaiting it. Resolution writes the value once; the awaiter takes it
/// once.
#[derive(Debug)]
pub(crate) struct OneShot<T>(Arc<Mutex<SlotState<T>>>);

#[derive(Debug)]
enum SlotState<T> {
    Pending,
    Ready(T),
    Taken,
}

impl<T> Clone for OneShot<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for OneShot<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(SlotState::Pending)))
    }
}

impl<T> OneShot<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState<T>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the value. Returns false if the slot was already resolved,
    /// in which case the new value is dropped.
    pub(crate) fn resolve(&self, value: T) -> bool {
        let mut state = self.lock();
        match *state {
            SlotState::Pending => {
                *state = SlotState::Ready(value);
                true
            }
            _ => false,
        }
    }

    /// Take the resolved value if present. Subsequent calls return `None`.
    pub(crate) fn try_take(&self) -> Option<T> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Ready(value) => Some(value),
            other => {
                *state = other;
                None
            }
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        !matches!(*self.lock(), SlotState::Pending)
    }
}

/// How a timer concluded, from the awaiting future's point of view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum TimerResolution {
    Fired,
    Cancelled,
}

/// Regular and local activities share a table; the lane only changes which
/// schedule/cancel commands are emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ActivityLane {
    Regular,
    Local,
}

pub(crate) struct TimerEntry {
    pub(crate) slot: OneShot<TimerResolution>,
    pub(crate) detached: bool,
}

pub(crate) struct ActivityEntry {
    pub(crate) slot: OneShot<ActivityResolution>,
    pub(crate) lane: ActivityLane,
    pub(crate) cancellation_type: ActivityCancellationType,
    pub(crate) detached: bool,
}

pub(crate) struct ChildWorkflowEntry {
    pub(crate) start: OneShot<ChildStartOutcome>,
    pub(crate) result: OneShot<ChildWorkflowResolution>,
    pub(crate) detached: bool,
}

pub(crate) struct ExternalSignalEntry {
    /// `None` resolution means the signal was delivered.
    pub(crate) slot: OneShot<Option<Failure>>,
}

/// The four pending-operation tables of a workflow instance.
#[derive(Default)]
pub(crate) struct PendingOps {
    pub(crate) timers: HashMap<Seq, TimerEntry>,
    pub(crate) activities: HashMap<Seq, ActivityEntry>,
    pub(crate) child_workflows: HashMap<Seq, ChildWorkflowEntry>,
    pub(crate) external_signals: HashMap<Seq, ExternalSignalEntry>,
}

impl PendingOps {
    /// Total entries across all tables, detached included.
    pub(crate) fn len(&self) -> usize {
        self.timers.len()
            + self.activities.len()
            + self.child_workflows.len()
            + self.external_signals.len()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_resolves_exactly_once() {
        let slot: OneShot<u32> = OneShot::new();
        assert!(!slot.is_resolved());

        assert!(slot.resolve(7));
        assert!(!slot.resolve(8));
        assert!(slot.is_resolved());

        assert_eq!(slot.try_take(), Some(7));
        assert_eq!(slot.try_take(), None);
        assert!(slot.is_resolved());
    }

    #[test]
    fn clones_share_the_same_slot() {
        let slot: OneShot<&str> = OneShot::new();
        let awaiter = slot.clone();

        slot.resolve("fired");
        assert_eq!(awaiter.try_take(), Some("fired"));
    }

    #[test]
    fn pending_ops_counts_all_tables() {
        let mut ops = PendingOps::default();
        assert_eq!(ops.len(), 0);

        ops.timers.insert(
            1,
            TimerEntry {
                slot: OneShot::new(),
                detached: false,
            },
        );
        ops.external_signals.insert(
            2,
            ExternalSignalEntry {
                slot: OneShot::new(),
            },
        );

        assert_eq!(ops.len(), 2);
    }
}
