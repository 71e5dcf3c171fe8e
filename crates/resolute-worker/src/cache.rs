//! Bounded LRU cache of live workflow instances.
//!
//! Instances are checked out for the duration of an activation (handoff, not
//! sharing) and returned afterwards. Overflow evicts the least recently used
//! resident instance; the server recovers any evicted run by replaying full
//! history into a fresh instance on its next activation.

use resolute_machine::WorkflowInstance;
use std::collections::HashMap;

struct CacheSlot {
    instance: WorkflowInstance,
    last_used: u64,
}

pub(crate) struct RunCache {
    capacity: usize,
    clock: u64,
    slots: HashMap<String, CacheSlot>,
}

impl RunCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            clock: 0,
            slots: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check an instance out for exclusive use. Absent means either unknown
    /// run or already checked out.
    pub(crate) fn take(&mut self, run_id: &str) -> Option<WorkflowInstance> {
        self.slots.remove(run_id).map(|slot| slot.instance)
    }

    /// Return (or first-insert) an instance after its activation completes.
    /// If the cache is over capacity afterwards, the least recently used
    /// run is evicted and returned so the caller can log it.
    pub(crate) fn put(&mut self, run_id: String, instance: WorkflowInstance) -> Option<String> {
        self.clock += 1;
        self.slots.insert(
            run_id,
            CacheSlot {
                instance,
                last_used: self.clock,
            },
        );

        if self.slots.len() <= self.capacity {
            return None;
        }
        let oldest = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(run_id, _)| run_id.clone())?;
        self.slots.remove(&oldest);
        Some(oldest)
    }
}
