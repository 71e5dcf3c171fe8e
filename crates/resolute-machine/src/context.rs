//! The surface user workflow code sees.
//!
//! A [`WfContext`] is a cheap clone handle onto the instance core. Every
//! externally observable operation buffers a command and allocates its
//! sequence number at call time, in task order, which is what makes command
//! order deterministic across replay. All suspension points funnel through
//! the one-shot slots in the pending tables; a `CancelWorkflow` job is
//! delivered as a cancellation failure to the first suspension point polled
//! afterwards.

use crate::instance::InstanceShared;
use crate::pending::{
    ActivityEntry, ActivityLane, ChildWorkflowEntry, ExternalSignalEntry, OneShot, TimerEntry,
    TimerResolution,
};
use crate::registry::{
    HandlerFuture, QueryInput, SignalInput, UpdateHandler, UpdateInput, WfExitValue,
};
use crate::scheduler::TaskFuture;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use resolute_types::activation::{ActivityResolution, ChildStartOutcome, ChildWorkflowResolution};
use resolute_types::{
    ActivityCancellationType, ActivityOptions, ChildWorkflowOptions, Command,
    ContinueAsNewOptions, Failure, Headers, Payload, RunState, SearchAttributes, Seq,
    SignalTarget,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

/// Handle to the current workflow run, passed to every handler.
///
/// There is no process-wide "current workflow"; all workflow-internal
/// primitives go through an explicit context clone.
#[derive(Clone)]
pub struct WfContext {
    shared: Arc<InstanceShared>,
}

impl WfContext {
    pub(crate) fn new(shared: Arc<InstanceShared>) -> Self {
        Self { shared }
    }

    // ── Environment ──

    /// Current logical time. Advances only via activations, never via the
    /// wall clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.shared.state().logical_now
    }

    /// Deterministic random value from the server-seeded source.
    pub fn random(&self) -> u64 {
        self.shared.state().rng.next_u64()
    }

    pub fn is_replaying(&self) -> bool {
        self.shared.state().is_replaying
    }

    pub fn run_id(&self) -> String {
        self.shared.state().run_id.clone()
    }

    pub fn workflow_id(&self) -> String {
        self.shared.state().workflow_id.clone()
    }

    pub fn workflow_type(&self) -> String {
        self.shared.state().workflow_type.clone()
    }

    pub fn headers(&self) -> Headers {
        self.shared.state().headers.clone()
    }

    /// The run's start input, as delivered by the `StartWorkflow` job.
    pub fn input(&self) -> Vec<Payload> {
        self.shared.state().input.clone()
    }

    /// The current server-assigned random seed.
    pub fn random_seed(&self) -> u64 {
        self.shared.state().random_seed
    }

    pub fn history_length(&self) -> u64 {
        self.shared.state().history_length
    }

    pub fn history_size_bytes(&self) -> u64 {
        self.shared.state().history_size_bytes
    }

    /// Server hint that this run should continue-as-new soon.
    pub fn continue_as_new_suggested(&self) -> bool {
        self.shared.state().continue_as_new_suggested
    }

    /// Whether a cancellation request has been received, without consuming
    /// the cancellation delivery.
    pub fn cancel_requested(&self) -> bool {
        self.shared.state().cancel_requested.is_some()
    }

    /// Deterministic branch gate for versioned workflow code.
    ///
    /// Returns true when the patch is announced in history, or when the run
    /// is executing fresh (in which case the id is recorded so later calls
    /// agree).
    pub fn patched(&self, patch_id: &str) -> bool {
        let mut state = self.shared.state();
        if state.patches.contains(patch_id) {
            return true;
        }
        if !state.is_replaying {
            state.patches.insert(patch_id.to_string());
            return true;
        }
        false
    }

    // ── Timers ──

    /// Start a cancelable timer. Durations must be strictly positive.
    pub fn timer(&self, duration: Duration) -> Result<TimerHandle, Failure> {
        if duration <= Duration::zero() {
            return Err(Failure::application(
                "InvalidArgument",
                format!("timer duration must be positive, got {}", duration),
            ));
        }
        let slot = OneShot::new();
        let mut state = self.shared.state();
        let seq = state.next_seq();
        state.push_command(Command::StartTimer { seq, duration });
        state.pending.timers.insert(
            seq,
            TimerEntry {
                slot: slot.clone(),
                detached: false,
            },
        );
        drop(state);
        Ok(TimerHandle {
            shared: self.shared.clone(),
            seq,
            slot,
        })
    }

    /// Suspend for the given duration.
    ///
    /// Zero sleeps return immediately without buffering a timer; negative
    /// durations are an argument failure with no command buffered.
    pub fn sleep(&self, duration: Duration) -> impl Future<Output = Result<(), Failure>> + Send + 'static {
        let started = if duration < Duration::zero() {
            Err(Failure::application(
                "InvalidArgument",
                format!("sleep duration must be non-negative, got {}", duration),
            ))
        } else if duration.is_zero() {
            Ok(None)
        } else {
            self.timer(duration).map(Some)
        };
        async move {
            match started? {
                Some(handle) => handle.fired().await,
                None => Ok(()),
            }
        }
    }

    // ── Conditions ──

    /// Suspend until the predicate holds. The predicate is re-evaluated
    /// after every applied job and every task yield within an activation.
    pub fn condition<F>(
        &self,
        predicate: F,
    ) -> impl Future<Output = Result<(), Failure>> + Send + 'static
    where
        F: FnMut() -> bool + Send + 'static,
    {
        ConditionFuture {
            shared: self.shared.clone(),
            predicate: Box::new(predicate),
        }
    }

    /// [`Self::condition`] racing a timer. Resolves `Ok(true)` when the
    /// predicate wins (the timer is canceled), `Ok(false)` on timeout.
    pub fn condition_timeout<F>(
        &self,
        predicate: F,
        timeout: Duration,
    ) -> impl Future<Output = Result<bool, Failure>> + Send + 'static
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let timer = if timeout <= Duration::zero() {
            None
        } else {
            self.timer(timeout).ok()
        };
        ConditionTimeoutFuture {
            shared: self.shared.clone(),
            predicate: Box::new(predicate),
            timer,
            immediate: timeout <= Duration::zero(),
        }
    }

    // ── Activities ──

    /// Buffer a `ScheduleActivity` command and return a handle for awaiting
    /// or canceling it.
    pub fn start_activity(
        &self,
        activity_type: impl Into<String>,
        input: Vec<Payload>,
        options: ActivityOptions,
    ) -> ActivityHandle {
        self.schedule_activity_on(ActivityLane::Regular, activity_type.into(), input, options)
    }

    /// Same contract as [`Self::start_activity`], local-activity lane.
    pub fn start_local_activity(
        &self,
        activity_type: impl Into<String>,
        input: Vec<Payload>,
        options: ActivityOptions,
    ) -> ActivityHandle {
        self.schedule_activity_on(ActivityLane::Local, activity_type.into(), input, options)
    }

    /// Schedule an activity and await its result.
    pub fn execute_activity(
        &self,
        activity_type: impl Into<String>,
        input: Vec<Payload>,
        options: ActivityOptions,
    ) -> impl Future<Output = Result<Payload, Failure>> + Send + 'static {
        let handle = self.start_activity(activity_type, input, options);
        async move { handle.result().await }
    }

    /// Schedule a local activity and await its result.
    pub fn execute_local_activity(
        &self,
        activity_type: impl Into<String>,
        input: Vec<Payload>,
        options: ActivityOptions,
    ) -> impl Future<Output = Result<Payload, Failure>> + Send + 'static {
        let handle = self.start_local_activity(activity_type, input, options);
        async move { handle.result().await }
    }

    fn schedule_activity_on(
        &self,
        lane: ActivityLane,
        activity_type: String,
        input: Vec<Payload>,
        options: ActivityOptions,
    ) -> ActivityHandle {
        let cancellation_type = options.cancellation_type;
        let slot = OneShot::new();
        let mut state = self.shared.state();
        let seq = state.next_seq();
        let command = match lane {
            ActivityLane::Regular => Command::ScheduleActivity {
                seq,
                activity_type: activity_type.clone(),
                input,
                options,
            },
            ActivityLane::Local => Command::ScheduleLocalActivity {
                seq,
                activity_type: activity_type.clone(),
                input,
                options,
            },
        };
        state.push_command(command);
        state.pending.activities.insert(
            seq,
            ActivityEntry {
                slot: slot.clone(),
                lane,
                cancellation_type,
                detached: false,
            },
        );
        drop(state);
        ActivityHandle {
            shared: self.shared.clone(),
            seq,
            activity_type,
            slot,
        }
    }

    // ── Child workflows ──

    /// Buffer a `StartChildWorkflow` command. The returned pending handle
    /// resolves in two phases: started, then closed.
    pub fn start_child_workflow(
        &self,
        workflow_type: impl Into<String>,
        input: Vec<Payload>,
        options: ChildWorkflowOptions,
    ) -> PendingChildWorkflow {
        let workflow_type = workflow_type.into();
        let start = OneShot::new();
        let result = OneShot::new();
        let mut state = self.shared.state();
        let seq = state.next_seq();
        state.push_command(Command::StartChildWorkflow {
            seq,
            workflow_type: workflow_type.clone(),
            input,
            options,
        });
        state.pending.child_workflows.insert(
            seq,
            ChildWorkflowEntry {
                start: start.clone(),
                result: result.clone(),
                detached: false,
            },
        );
        drop(state);
        PendingChildWorkflow {
            shared: self.shared.clone(),
            seq,
            workflow_type,
            start,
            result,
        }
    }

    // ── External signals ──

    /// Signal an arbitrary execution; resolves when the server reports
    /// delivery or failure.
    pub fn signal_external_workflow(
        &self,
        target: SignalTarget,
        signal_name: impl Into<String>,
        input: Vec<Payload>,
    ) -> impl Future<Output = Result<(), Failure>> + Send + 'static {
        let slot = signal_external(&self.shared, target, signal_name.into(), input);
        SignalDeliveryFuture {
            shared: self.shared.clone(),
            slot,
        }
    }

    // ── Workflow closers ──

    /// Build the continue-as-new exit value for returning from the run entry.
    pub fn continue_as_new(&self, options: ContinueAsNewOptions) -> WfExitValue {
        WfExitValue::ContinueAsNew(Box::new(options))
    }

    pub fn upsert_search_attributes(&self, attributes: SearchAttributes) {
        self.shared
            .state()
            .push_command(Command::UpsertSearchAttributes { attributes });
    }

    // ── Dynamic handler registration ──

    /// Register a signal handler at runtime. Signals buffered for the name
    /// are drained FIFO as new scheduler tasks before any later delivery.
    pub fn register_signal_handler(
        &self,
        name: impl Into<String>,
        handler: impl FnMut(WfContext, SignalInput) -> HandlerFuture<Result<(), Failure>>
        + Send
        + 'static,
    ) -> Result<(), Failure> {
        let name = name.into();
        {
            let mut table = self.shared.handlers();
            if table.signals.contains_key(&name) {
                return Err(Failure::application(
                    "DuplicateHandler",
                    format!("signal handler {:?} already registered", name),
                ));
            }
            table.signals.insert(name.clone(), Box::new(handler));
        }
        let queued = self
            .shared
            .state()
            .signal_queue
            .remove(&name)
            .unwrap_or_default();
        for input in queued {
            deliver_signal(&self.shared, input);
        }
        Ok(())
    }

    pub fn register_query_handler(
        &self,
        name: impl Into<String>,
        handler: impl FnMut(QueryInput) -> Result<Payload, Failure> + Send + 'static,
    ) -> Result<(), Failure> {
        let name = name.into();
        let mut table = self.shared.handlers();
        if table.queries.contains_key(&name) {
            return Err(Failure::application(
                "DuplicateHandler",
                format!("query handler {:?} already registered", name),
            ));
        }
        table.queries.insert(name, Box::new(handler));
        Ok(())
    }

    pub fn register_update_handler(
        &self,
        name: impl Into<String>,
        validator: Option<crate::registry::ValidatorFn>,
        handler: impl FnMut(WfContext, UpdateInput) -> HandlerFuture<Result<Payload, Failure>>
        + Send
        + 'static,
    ) -> Result<(), Failure> {
        let name = name.into();
        let mut table = self.shared.handlers();
        if table.updates.contains_key(&name) {
            return Err(Failure::application(
                "DuplicateHandler",
                format!("update handler {:?} already registered", name),
            ));
        }
        table.updates.insert(
            name,
            UpdateHandler {
                validator,
                handler: Box::new(handler),
            },
        );
        Ok(())
    }
}

// ── Handles ──

/// A started timer. Awaiting and cancellation both go through the pending
/// entry created at start time.
pub struct TimerHandle {
    shared: Arc<InstanceShared>,
    seq: Seq,
    slot: OneShot<TimerResolution>,
}

impl TimerHandle {
    pub fn seq(&self) -> Seq {
        self.seq
    }

    /// Resolves when the server fires the timer; a canceled timer resolves
    /// with a cancellation failure.
    pub fn fired(self) -> impl Future<Output = Result<(), Failure>> + Send + 'static {
        TimerFuture {
            shared: self.shared,
            slot: self.slot,
        }
    }

    /// Buffer `CancelTimer` and resolve the awaiting task as canceled. No-op
    /// if the timer already fired.
    pub fn cancel(&self) {
        cancel_timer(&self.shared, self.seq);
    }
}

pub(crate) fn cancel_timer(shared: &Arc<InstanceShared>, seq: Seq) {
    let mut state = shared.state();
    let Some(entry) = state.pending.timers.get_mut(&seq) else {
        return;
    };
    if entry.slot.is_resolved() {
        return;
    }
    entry.detached = true;
    let slot = entry.slot.clone();
    state.push_command(Command::CancelTimer { seq });
    drop(state);
    slot.resolve(TimerResolution::Cancelled);
    shared.scheduler.mark_progress();
}

/// A scheduled activity (regular or local lane).
pub struct ActivityHandle {
    shared: Arc<InstanceShared>,
    seq: Seq,
    activity_type: String,
    slot: OneShot<ActivityResolution>,
}

impl ActivityHandle {
    pub fn seq(&self) -> Seq {
        self.seq
    }

    /// Await the activity's resolution. Failures arrive wrapped in an
    /// activity-failure envelope; cancellations arrive as cancellation
    /// failures.
    pub fn result(self) -> impl Future<Output = Result<Payload, Failure>> + Send + 'static {
        ActivityResultFuture {
            shared: self.shared,
            seq: self.seq,
            activity_type: self.activity_type,
            slot: self.slot,
        }
    }

    /// Cancel per the schedule-time cancellation type recorded on the
    /// pending entry: try-cancel requests and resolves immediately,
    /// wait-completion requests and leaves the resolver pending, abandon
    /// detaches without a request.
    pub fn cancel(&self) {
        if self.slot.is_resolved() {
            return;
        }
        let mut state = self.shared.state();
        let Some(entry) = state.pending.activities.get_mut(&self.seq) else {
            return;
        };
        let cancel_command = match entry.lane {
            ActivityLane::Regular => Command::RequestCancelActivity { seq: self.seq },
            ActivityLane::Local => Command::RequestCancelLocalActivity { seq: self.seq },
        };
        match entry.cancellation_type {
            ActivityCancellationType::TryCancel => {
                entry.detached = true;
                state.push_command(cancel_command);
                drop(state);
                self.slot.resolve(ActivityResolution::Cancelled);
                self.shared.scheduler.mark_progress();
            }
            ActivityCancellationType::WaitCancellationCompleted => {
                state.push_command(cancel_command);
            }
            ActivityCancellationType::Abandon => {
                entry.detached = true;
                drop(state);
                self.slot.resolve(ActivityResolution::Cancelled);
                self.shared.scheduler.mark_progress();
            }
        }
    }
}

/// First phase of a started child workflow.
pub struct PendingChildWorkflow {
    shared: Arc<InstanceShared>,
    seq: Seq,
    workflow_type: String,
    start: OneShot<ChildStartOutcome>,
    result: OneShot<ChildWorkflowResolution>,
}

impl PendingChildWorkflow {
    pub fn seq(&self) -> Seq {
        self.seq
    }

    /// Resolves once the server reports whether the child started.
    pub fn started(
        self,
    ) -> impl Future<Output = Result<ChildWorkflowHandle, Failure>> + Send + 'static {
        ChildStartFuture {
            shared: self.shared,
            seq: self.seq,
            workflow_type: self.workflow_type,
            start: self.start,
            result: self.result,
        }
    }
}

/// A running child workflow.
pub struct ChildWorkflowHandle {
    shared: Arc<InstanceShared>,
    seq: Seq,
    workflow_type: String,
    child_run_id: String,
    result: OneShot<ChildWorkflowResolution>,
}

impl ChildWorkflowHandle {
    pub fn run_id(&self) -> &str {
        &self.child_run_id
    }

    /// Await the child's close. Failures arrive wrapped in a child-workflow
    /// envelope.
    pub fn result(self) -> impl Future<Output = Result<Payload, Failure>> + Send + 'static {
        ChildResultFuture {
            shared: self.shared,
            seq: self.seq,
            workflow_type: self.workflow_type,
            slot: self.result,
        }
    }

    /// Signal the child through its parent-side handle.
    pub fn signal(
        &self,
        signal_name: impl Into<String>,
        input: Vec<Payload>,
    ) -> impl Future<Output = Result<(), Failure>> + Send + 'static {
        let slot = signal_external(
            &self.shared,
            SignalTarget::ChildWorkflow { seq: self.seq },
            signal_name.into(),
            input,
        );
        SignalDeliveryFuture {
            shared: self.shared.clone(),
            slot,
        }
    }

    /// Request cancellation of the child. The result future resolves once
    /// the server reports the child closed.
    pub fn cancel(&self) {
        self.shared
            .state()
            .push_command(Command::CancelChildWorkflow { seq: self.seq });
    }
}

fn signal_external(
    shared: &Arc<InstanceShared>,
    target: SignalTarget,
    signal_name: String,
    input: Vec<Payload>,
) -> OneShot<Option<Failure>> {
    let slot = OneShot::new();
    let mut state = shared.state();
    let seq = state.next_seq();
    state.push_command(Command::SignalExternalWorkflow {
        seq,
        target,
        signal_name,
        input,
    });
    state
        .pending
        .external_signals
        .insert(seq, ExternalSignalEntry { slot: slot.clone() });
    slot
}

// ── Suspension futures ──

/// Take a resolved slot value or the pending workflow cancellation, marking
/// scheduler progress whenever the poll comes back ready.
fn poll_slot<T>(shared: &InstanceShared, slot: &OneShot<T>) -> Poll<Result<T, Failure>> {
    if let Some(value) = slot.try_take() {
        shared.scheduler.mark_progress();
        return Poll::Ready(Ok(value));
    }
    if let Some(cancellation) = shared.state().take_cancellation() {
        shared.scheduler.mark_progress();
        return Poll::Ready(Err(cancellation));
    }
    Poll::Pending
}

struct TimerFuture {
    shared: Arc<InstanceShared>,
    slot: OneShot<TimerResolution>,
}

impl Future for TimerFuture {
    type Output = Result<(), Failure>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match poll_slot(&self.shared, &self.slot) {
            Poll::Ready(Ok(TimerResolution::Fired)) => Poll::Ready(Ok(())),
            Poll::Ready(Ok(TimerResolution::Cancelled)) => {
                Poll::Ready(Err(Failure::cancelled("timer canceled")))
            }
            Poll::Ready(Err(failure)) => Poll::Ready(Err(failure)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct ActivityResultFuture {
    shared: Arc<InstanceShared>,
    seq: Seq,
    activity_type: String,
    slot: OneShot<ActivityResolution>,
}

impl Future for ActivityResultFuture {
    type Output = Result<Payload, Failure>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match poll_slot(&self.shared, &self.slot) {
            Poll::Ready(Ok(ActivityResolution::Completed { result })) => Poll::Ready(Ok(result)),
            Poll::Ready(Ok(ActivityResolution::Failed {
                failure,
                retry_state,
            })) => Poll::Ready(Err(Failure::Activity {
                activity_type: self.activity_type.clone(),
                scheduled_seq: self.seq,
                retry_state,
                cause: Box::new(failure),
            })),
            Poll::Ready(Ok(ActivityResolution::Cancelled)) => {
                Poll::Ready(Err(Failure::cancelled("activity canceled")))
            }
            Poll::Ready(Err(failure)) => Poll::Ready(Err(failure)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct ChildStartFuture {
    shared: Arc<InstanceShared>,
    seq: Seq,
    workflow_type: String,
    start: OneShot<ChildStartOutcome>,
    result: OneShot<ChildWorkflowResolution>,
}

impl Future for ChildStartFuture {
    type Output = Result<ChildWorkflowHandle, Failure>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match poll_slot(&self.shared, &self.start) {
            Poll::Ready(Ok(ChildStartOutcome::Succeeded { run_id })) => {
                Poll::Ready(Ok(ChildWorkflowHandle {
                    shared: self.shared.clone(),
                    seq: self.seq,
                    workflow_type: self.workflow_type.clone(),
                    child_run_id: run_id,
                    result: self.result.clone(),
                }))
            }
            Poll::Ready(Ok(ChildStartOutcome::Failed { failure })) => {
                Poll::Ready(Err(Failure::ChildWorkflow {
                    workflow_type: self.workflow_type.clone(),
                    scheduled_seq: self.seq,
                    cause: Box::new(failure),
                }))
            }
            Poll::Ready(Ok(ChildStartOutcome::Cancelled)) => {
                Poll::Ready(Err(Failure::cancelled("child workflow start canceled")))
            }
            Poll::Ready(Err(failure)) => Poll::Ready(Err(failure)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct ChildResultFuture {
    shared: Arc<InstanceShared>,
    seq: Seq,
    workflow_type: String,
    slot: OneShot<ChildWorkflowResolution>,
}

impl Future for ChildResultFuture {
    type Output = Result<Payload, Failure>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match poll_slot(&self.shared, &self.slot) {
            Poll::Ready(Ok(ChildWorkflowResolution::Completed { result })) => {
                Poll::Ready(Ok(result))
            }
            Poll::Ready(Ok(ChildWorkflowResolution::Failed { failure })) => {
                Poll::Ready(Err(Failure::ChildWorkflow {
                    workflow_type: self.workflow_type.clone(),
                    scheduled_seq: self.seq,
                    cause: Box::new(failure),
                }))
            }
            Poll::Ready(Ok(ChildWorkflowResolution::Cancelled)) => {
                Poll::Ready(Err(Failure::cancelled("child workflow canceled")))
            }
            Poll::Ready(Err(failure)) => Poll::Ready(Err(failure)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct SignalDeliveryFuture {
    shared: Arc<InstanceShared>,
    slot: OneShot<Option<Failure>>,
}

impl Future for SignalDeliveryFuture {
    type Output = Result<(), Failure>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match poll_slot(&self.shared, &self.slot) {
            Poll::Ready(Ok(None)) => Poll::Ready(Ok(())),
            Poll::Ready(Ok(Some(failure))) => Poll::Ready(Err(failure)),
            Poll::Ready(Err(failure)) => Poll::Ready(Err(failure)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct ConditionFuture {
    shared: Arc<InstanceShared>,
    predicate: Box<dyn FnMut() -> bool + Send>,
}

impl Future for ConditionFuture {
    type Output = Result<(), Failure>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if (this.predicate)() {
            this.shared.scheduler.mark_progress();
            return Poll::Ready(Ok(()));
        }
        if let Some(cancellation) = this.shared.state().take_cancellation() {
            this.shared.scheduler.mark_progress();
            return Poll::Ready(Err(cancellation));
        }
        Poll::Pending
    }
}

struct ConditionTimeoutFuture {
    shared: Arc<InstanceShared>,
    predicate: Box<dyn FnMut() -> bool + Send>,
    timer: Option<TimerHandle>,
    immediate: bool,
}

impl Future for ConditionTimeoutFuture {
    type Output = Result<bool, Failure>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if (this.predicate)() {
            if let Some(timer) = &this.timer {
                timer.cancel();
            }
            this.shared.scheduler.mark_progress();
            return Poll::Ready(Ok(true));
        }
        if this.immediate {
            this.shared.scheduler.mark_progress();
            return Poll::Ready(Ok(false));
        }
        if let Some(timer) = &this.timer {
            if timer.slot.try_take().is_some() {
                this.shared.scheduler.mark_progress();
                return Poll::Ready(Ok(false));
            }
        }
        if let Some(cancellation) = this.shared.state().take_cancellation() {
            this.shared.scheduler.mark_progress();
            return Poll::Ready(Err(cancellation));
        }
        Poll::Pending
    }
}

// ── Handler task plumbing ──

/// Route a signal to its handler, the dynamic fallback, or the buffer.
/// Handler tasks run as independent scheduler tasks and may await.
pub(crate) fn deliver_signal(shared: &Arc<InstanceShared>, input: SignalInput) {
    let name = input.signal_name.clone();
    let mut table = shared.handlers();
    if let Some(mut handler) = table.signals.remove(&name) {
        drop(table);
        let future = handler(WfContext::new(shared.clone()), input);
        shared.handlers().signals.insert(name, handler);
        spawn_signal_task(shared, future);
    } else if let Some(mut handler) = table.dynamic_signal.take() {
        drop(table);
        let future = handler(WfContext::new(shared.clone()), input);
        shared.handlers().dynamic_signal = Some(handler);
        spawn_signal_task(shared, future);
    } else {
        debug!(signal = %name, "buffering signal with no registered handler");
        shared
            .state()
            .signal_queue
            .entry(name)
            .or_default()
            .push_back(input);
    }
}

/// A signal handler that returns a non-cancellation failure ends the
/// workflow with that failure, matching the run task's terminal handling of
/// user-raised failures.
fn spawn_signal_task(shared: &Arc<InstanceShared>, future: HandlerFuture<Result<(), Failure>>) {
    let shared_for_task = shared.clone();
    let task: TaskFuture = Box::pin(async move {
        if let Err(failure) = future.await {
            if failure.is_cancellation() {
                return;
            }
            let mut state = shared_for_task.state();
            if state.run_outcome.is_none() {
                state.run_outcome = Some(Err(failure));
                state.run_state = RunState::Completing;
            }
        }
    });
    shared.scheduler.spawn(task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::WorkflowInstance;
    use crate::registry::WorkflowHandlers;

    fn harness() -> (WorkflowInstance, WfContext) {
        let handlers = WorkflowHandlers::builder(|_ctx, _input| {
            Box::pin(async { Ok(WfExitValue::Normal(Payload::new(vec![]))) })
        })
        .build();
        let instance = WorkflowInstance::new("run-ctx", handlers);
        let ctx = WfContext::new(instance.shared.clone());
        (instance, ctx)
    }

    #[test]
    fn timer_allocates_sequence_and_buffers_command() {
        let (instance, ctx) = harness();
        let handle = ctx.timer(Duration::seconds(5)).unwrap();

        let state = instance.shared.state();
        assert_eq!(handle.seq(), 1);
        assert_eq!(
            state.commands,
            vec![Command::StartTimer {
                seq: 1,
                duration: Duration::seconds(5),
            }]
        );
        assert!(state.pending.timers.contains_key(&1));
    }

    #[test]
    fn non_positive_timer_is_rejected_without_commands() {
        let (instance, ctx) = harness();
        assert!(ctx.timer(Duration::zero()).is_err());
        assert!(ctx.timer(Duration::seconds(-1)).is_err());
        assert!(instance.shared.state().commands.is_empty());
    }

    #[test]
    fn timer_cancel_buffers_cancel_and_detaches() {
        let (instance, ctx) = harness();
        let handle = ctx.timer(Duration::seconds(5)).unwrap();
        handle.cancel();

        let state = instance.shared.state();
        assert_eq!(state.commands.len(), 2);
        assert_eq!(state.commands[1], Command::CancelTimer { seq: 1 });
        let entry = &state.pending.timers[&1];
        assert!(entry.detached);
        assert!(entry.slot.is_resolved());
    }

    #[test]
    fn try_cancel_activity_requests_and_resolves_immediately() {
        let (instance, ctx) = harness();
        let handle = ctx.start_activity("charge", vec![], ActivityOptions::default());
        handle.cancel();

        let state = instance.shared.state();
        assert_eq!(state.commands[1], Command::RequestCancelActivity { seq: 1 });
        let entry = &state.pending.activities[&1];
        assert!(entry.detached);
        assert!(entry.slot.is_resolved());
    }

    #[test]
    fn abandon_cancel_sends_no_request() {
        let (instance, ctx) = harness();
        let handle = ctx.start_activity(
            "charge",
            vec![],
            ActivityOptions {
                cancellation_type: ActivityCancellationType::Abandon,
                ..Default::default()
            },
        );
        handle.cancel();

        let state = instance.shared.state();
        assert_eq!(state.commands.len(), 1, "only the schedule command");
        assert!(state.pending.activities[&1].detached);
    }

    #[test]
    fn wait_cancel_leaves_resolver_pending() {
        let (instance, ctx) = harness();
        let handle = ctx.start_activity(
            "charge",
            vec![],
            ActivityOptions {
                cancellation_type: ActivityCancellationType::WaitCancellationCompleted,
                ..Default::default()
            },
        );
        handle.cancel();

        let state = instance.shared.state();
        assert_eq!(state.commands[1], Command::RequestCancelActivity { seq: 1 });
        let entry = &state.pending.activities[&1];
        assert!(!entry.detached);
        assert!(!entry.slot.is_resolved());
    }

    #[test]
    fn patched_records_fresh_patches_and_replays_announced_ones() {
        let (instance, ctx) = harness();
        assert!(ctx.patched("v2"));
        assert!(ctx.patched("v2"));

        instance.shared.state().is_replaying = true;
        assert!(ctx.patched("v2"), "recorded patch stays visible");
        assert!(!ctx.patched("v3"), "unannounced patch during replay");
    }

    #[test]
    fn local_activity_uses_local_lane_commands() {
        let (instance, ctx) = harness();
        let handle = ctx.start_local_activity("resize", vec![], ActivityOptions::default());
        handle.cancel();

        let state = instance.shared.state();
        assert!(matches!(
            state.commands[0],
            Command::ScheduleLocalActivity { seq: 1, .. }
        ));
        assert_eq!(
            state.commands[1],
            Command::RequestCancelLocalActivity { seq: 1 }
        );
    }

    #[test]
    fn child_signal_targets_child_by_start_seq() {
        let (instance, ctx) = harness();
        let pending = ctx.start_child_workflow("sub", vec![], ChildWorkflowOptions::default());
        let seq = pending.seq();

        // Resolve the start phase directly so a handle exists.
        instance.shared.state().pending.child_workflows[&seq]
            .start
            .resolve(ChildStartOutcome::Succeeded {
                run_id: "child-run".into(),
            });

        let mut started = Box::pin(pending.started());
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        let Poll::Ready(Ok(handle)) = started.as_mut().poll(&mut cx) else {
            panic!("start phase should be resolved");
        };

        let _delivery = handle.signal("nudge", vec![]);
        let state = instance.shared.state();
        assert!(matches!(
            state.commands[1],
            Command::SignalExternalWorkflow {
                target: SignalTarget::ChildWorkflow { seq: child_seq },
                ..
            } if child_seq == seq
        ));
    }
}
