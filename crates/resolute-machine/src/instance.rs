//! Workflow instance state.
//!
//! One [`WorkflowInstance`] exists per live run. It owns the shared core
//! (command buffer, pending-operation tables, logical time, random source,
//! handler table) and the deterministic scheduler driving the run's tasks.
//! The instance is exclusively owned by whoever processes its activations;
//! it is handed off between executors, never shared.

use crate::pending::PendingOps;
use crate::registry::{HandlerTable, SignalInput, WfExitValue, WorkflowHandlers};
use crate::scheduler::{Scheduler, SchedulerShared};
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use resolute_types::{Command, Failure, Headers, Payload, RunState, Seq, TaskFailure};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Durable record of an update's outcome, keyed by update id. Reconstructed
/// on replay by re-applying the same `DoUpdate` jobs, which keeps rejections
/// and completions idempotent.
pub(crate) enum UpdateRecord {
    /// Validation passed; handler task in flight.
    Accepted,
    Completed(Result<Payload, Failure>),
    Rejected(Failure),
}

/// Mutable core of a workflow instance. Guarded by a single mutex in
/// [`InstanceShared`]; the lock is only ever taken briefly and never held
/// across a suspension point.
pub(crate) struct CoreState {
    pub(crate) run_id: String,
    pub(crate) workflow_id: String,
    pub(crate) workflow_type: String,
    pub(crate) input: Vec<Payload>,
    pub(crate) headers: Headers,
    pub(crate) run_state: RunState,
    /// Advances only via activation timestamps, monotonically.
    pub(crate) logical_now: DateTime<Utc>,
    pub(crate) is_replaying: bool,
    pub(crate) random_seed: u64,
    pub(crate) rng: StdRng,
    /// Next outbound sequence number. Advances only when a command that
    /// expects a resolution is buffered; never reused within a run.
    pub(crate) next_sequence: Seq,
    pub(crate) commands: Vec<Command>,
    pub(crate) pending: PendingOps,
    /// FIFO buffer per signal name for deliveries without a handler.
    pub(crate) signal_queue: HashMap<String, VecDeque<SignalInput>>,
    pub(crate) update_records: HashMap<String, UpdateRecord>,
    /// Patch ids announced via `NotifyHasPatch`, plus ids first used while
    /// not replaying.
    pub(crate) patches: HashSet<String>,
    pub(crate) cancel_requested: Option<String>,
    cancel_delivered: bool,
    /// Set once by the run task's wrapper; converted to the terminal command
    /// when the activation's tick has quiesced.
    pub(crate) run_outcome: Option<Result<WfExitValue, Failure>>,
    /// If set when the activation quiesces, the completion is a task failure
    /// and the command buffer is discarded.
    pub(crate) task_failure: Option<TaskFailure>,
    /// True while a query or update validator runs; buffering a command in
    /// this window fails the query/validation instead of mutating the run.
    pub(crate) read_only: bool,
    pub(crate) read_only_violation: Option<&'static str>,
    pub(crate) history_length: u64,
    pub(crate) history_size_bytes: u64,
    pub(crate) continue_as_new_suggested: bool,
}

impl CoreState {
    /// Buffer an outbound command, enforcing the close and read-only gates.
    pub(crate) fn push_command(&mut self, command: Command) {
        if self.read_only {
            self.read_only_violation.get_or_insert(command.name());
            return;
        }
        if self.run_state == RunState::Completing || self.run_state.is_terminal() {
            debug_assert!(
                false,
                "command {} buffered after workflow close",
                command.name()
            );
            warn!(
                run_id = %self.run_id,
                command = command.name(),
                "dropping command buffered after workflow close"
            );
            return;
        }
        self.commands.push(command);
    }

    /// Allocate the next sequence number. Call only when a command is being
    /// buffered in the same breath.
    pub(crate) fn next_seq(&mut self) -> Seq {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    /// Deliver the workflow cancellation exactly once, to the first
    /// suspension point polled after the `CancelWorkflow` job.
    pub(crate) fn take_cancellation(&mut self) -> Option<Failure> {
        if self.cancel_delivered {
            return None;
        }
        let reason = self.cancel_requested.as_deref()?;
        self.cancel_delivered = true;
        Some(Failure::cancelled(reason.to_string()))
    }

    /// Record a task failure, keeping the first one.
    pub(crate) fn fail_task(&mut self, failure: TaskFailure) {
        if self.task_failure.is_none() {
            self.task_failure = Some(failure);
        }
    }

    /// Monotonic logical-time advance from an activation timestamp.
    pub(crate) fn advance_time(&mut self, timestamp: DateTime<Utc>) {
        if timestamp > self.logical_now {
            self.logical_now = timestamp;
        }
    }

    pub(crate) fn reseed(&mut self, seed: u64) {
        self.random_seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }
}

/// State shared between the instance, its scheduler tasks, and every
/// [`crate::context::WfContext`] clone. The two mutexes are leaf locks:
/// nothing locks one while holding the other across user code.
pub(crate) struct InstanceShared {
    state: Mutex<CoreState>,
    handlers: Mutex<HandlerTable>,
    pub(crate) scheduler: Arc<SchedulerShared>,
}

impl InstanceShared {
    pub(crate) fn state(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn handlers(&self) -> MutexGuard<'_, HandlerTable> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One per live workflow run.
pub struct WorkflowInstance {
    pub(crate) shared: Arc<InstanceShared>,
    pub(crate) scheduler: Scheduler,
}

impl WorkflowInstance {
    /// Construct an instance awaiting its `StartWorkflow` job. The handler
    /// set comes from the registry's factory for the run's workflow type.
    pub fn new(run_id: impl Into<String>, handlers: WorkflowHandlers) -> Self {
        let scheduler_shared = Arc::new(SchedulerShared::default());
        let shared = Arc::new(InstanceShared {
            state: Mutex::new(CoreState {
                run_id: run_id.into(),
                workflow_id: String::new(),
                workflow_type: String::new(),
                input: Vec::new(),
                headers: Headers::new(),
                run_state: RunState::Created,
                logical_now: DateTime::<Utc>::UNIX_EPOCH,
                is_replaying: false,
                random_seed: 0,
                rng: StdRng::seed_from_u64(0),
                next_sequence: 1,
                commands: Vec::new(),
                pending: PendingOps::default(),
                signal_queue: HashMap::new(),
                update_records: HashMap::new(),
                patches: HashSet::new(),
                cancel_requested: None,
                cancel_delivered: false,
                run_outcome: None,
                task_failure: None,
                read_only: false,
                read_only_violation: None,
                history_length: 0,
                history_size_bytes: 0,
                continue_as_new_suggested: false,
            }),
            handlers: Mutex::new(handlers.table),
            scheduler: scheduler_shared.clone(),
        });
        Self {
            shared,
            scheduler: Scheduler::new(scheduler_shared),
        }
    }

    pub fn run_id(&self) -> String {
        self.shared.state().run_id.clone()
    }

    pub fn run_state(&self) -> RunState {
        self.shared.state().run_state
    }

    /// Number of unresolved pending operations across all tables.
    pub fn pending_operations(&self) -> usize {
        self.shared.state().pending.len()
    }
}
