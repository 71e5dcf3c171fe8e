//! Activation application: the bridge between server-sent job batches and
//! the instance's scheduler.
//!
//! Jobs are applied in the prescribed order (patches and reseeds first, then
//! cancellation, then resolutions, then signals, then updates, with queries
//! last), the scheduler runs a single tick over the whole batch, and the
//! command buffer is harvested into a completion. Queries execute after the
//! tick in a read-only phase and contribute responses, never commands.

use crate::context::{WfContext, deliver_signal};
use crate::instance::{UpdateRecord, WorkflowInstance};
use crate::pending::TimerResolution;
use crate::scheduler::panic_message;
use crate::registry::{QueryInput, SignalInput, UpdateInput, WfExitValue};
use resolute_types::activation::{
    ActivationJob, ChildStartOutcome, EvictionReason, QueryResponse, WorkflowActivation,
};
use resolute_types::{
    ActivationCompletion, Command, Failure, Payload, RunState, TaskFailure, UpdateOutcome,
};
use tracing::{debug, warn};

/// Result of applying one activation to an instance.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub completion: ActivationCompletion,
    /// The instance must be dropped from the worker's cache: an eviction job
    /// arrived, the activation failed, or the protocol was violated.
    pub evict: bool,
}

/// Run a synchronous handler (query or update validator), converting a panic
/// into a failure for that handler alone rather than unwinding into the
/// worker loop.
fn catch_handler_panic<T>(handler: impl FnOnce() -> Result<T, Failure>) -> Result<T, Failure> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(handler)) {
        Ok(result) => result,
        Err(panic) => Err(Failure::application(
            "Panic",
            format!("handler panicked: {}", panic_message(panic.as_ref())),
        )),
    }
}

/// Prescribed application order. Stable sort preserves server order within
/// each class.
fn job_rank(job: &ActivationJob) -> u8 {
    match job {
        ActivationJob::NotifyHasPatch { .. } | ActivationJob::UpdateRandomSeed { .. } => 0,
        ActivationJob::StartWorkflow { .. } => 1,
        ActivationJob::CancelWorkflow { .. } => 2,
        ActivationJob::FireTimer { .. }
        | ActivationJob::ResolveActivity { .. }
        | ActivationJob::ResolveChildWorkflowStart { .. }
        | ActivationJob::ResolveChildWorkflow { .. }
        | ActivationJob::ResolveSignalExternalWorkflow { .. } => 3,
        ActivationJob::SignalWorkflow { .. } => 4,
        ActivationJob::DoUpdate { .. } => 5,
        ActivationJob::QueryWorkflow { .. } => 6,
        ActivationJob::RemoveFromCache { .. } => 7,
    }
}

impl WorkflowInstance {
    /// Apply one activation batch and assemble its completion.
    pub fn apply_activation(&mut self, activation: WorkflowActivation) -> DispatchOutcome {
        let run_id = activation.run_id.clone();

        if activation.is_only_eviction() {
            debug!(run_id = %run_id, "evicting on RemoveFromCache");
            return DispatchOutcome {
                completion: ActivationCompletion::success(run_id, Vec::new(), Vec::new()),
                evict: true,
            };
        }

        if self.run_state().is_terminal() {
            warn!(run_id = %run_id, "activation received after terminal state");
            return DispatchOutcome {
                completion: ActivationCompletion::fail(
                    run_id,
                    TaskFailure::generic("activation received after workflow reached terminal state"),
                ),
                evict: true,
            };
        }

        {
            let mut state = self.shared.state();
            state.advance_time(activation.timestamp);
            state.is_replaying = activation.is_replaying;
            state.history_length = activation.history_length;
            state.history_size_bytes = activation.history_size_bytes;
            state.continue_as_new_suggested = activation.continue_as_new_suggested;
            state.read_only_violation = None;
            if state.run_state == RunState::Suspended {
                state.run_state = RunState::Running;
            }
        }

        let mut jobs = activation.jobs;
        jobs.sort_by_key(job_rank);

        let mut evict = false;
        let mut queries = Vec::new();
        for job in jobs {
            match job {
                ActivationJob::QueryWorkflow {
                    query_id,
                    query_name,
                    input,
                } => queries.push((query_id, query_name, input)),
                ActivationJob::RemoveFromCache { reason, message } => {
                    debug!(run_id = %run_id, ?reason, %message, "eviction requested");
                    evict = true;
                }
                other => self.apply_job(other),
            }
        }

        if let Err(task_failure) = self.scheduler.tick() {
            self.shared.state().fail_task(task_failure);
        }
        debug!(
            run_id = %run_id,
            live_tasks = self.scheduler.live_tasks(),
            pending_ops = self.shared.state().pending.len(),
            "tick quiesced"
        );

        let query_responses = self.run_queries(queries);
        let completion = self.harvest(run_id, query_responses);
        let failed = matches!(
            completion.status,
            resolute_types::CompletionStatus::Failed { .. }
        );

        DispatchOutcome {
            completion,
            evict: evict || failed,
        }
    }

    fn apply_job(&mut self, job: ActivationJob) {
        match job {
            ActivationJob::StartWorkflow {
                workflow_type,
                workflow_id,
                input,
                headers,
                random_seed,
            } => {
                {
                    let mut state = self.shared.state();
                    if state.run_state != RunState::Created {
                        state.fail_task(TaskFailure::nondeterminism(
                            "StartWorkflow job for an already started run",
                        ));
                        return;
                    }
                    state.workflow_type = workflow_type;
                    state.workflow_id = workflow_id;
                    state.input = input.clone();
                    state.headers = headers;
                    state.reseed(random_seed);
                    state.run_state = RunState::Running;
                }
                let run = self.shared.handlers().run.take();
                match run {
                    Some(run_fn) => {
                        let future = run_fn(WfContext::new(self.shared.clone()), input);
                        let shared = self.shared.clone();
                        self.shared.scheduler.spawn(Box::pin(async move {
                            let outcome = future.await;
                            let mut state = shared.state();
                            if state.run_outcome.is_none() {
                                state.run_outcome = Some(outcome);
                                state.run_state = RunState::Completing;
                            }
                        }));
                    }
                    None => self
                        .shared
                        .state()
                        .fail_task(TaskFailure::generic("workflow type has no run entry")),
                }
            }

            ActivationJob::FireTimer { seq } => {
                let entry = self.shared.state().pending.timers.remove(&seq);
                match entry {
                    Some(entry) => {
                        if !entry.detached {
                            entry.slot.resolve(TimerResolution::Fired);
                            self.shared.scheduler.mark_progress();
                        }
                    }
                    None => self.shared.state().fail_task(TaskFailure::nondeterminism(
                        format!("FireTimer for unknown seq {}", seq),
                    )),
                }
            }

            ActivationJob::ResolveActivity { seq, resolution } => {
                let entry = self.shared.state().pending.activities.remove(&seq);
                match entry {
                    Some(entry) => {
                        if !entry.detached {
                            entry.slot.resolve(resolution);
                            self.shared.scheduler.mark_progress();
                        }
                    }
                    None => self.shared.state().fail_task(TaskFailure::nondeterminism(
                        format!("ResolveActivity for unknown seq {}", seq),
                    )),
                }
            }

            ActivationJob::ResolveChildWorkflowStart { seq, outcome } => {
                // A child that failed or was canceled before starting will
                // never produce a result resolution, so its entry goes away
                // with the start phase.
                let keep_entry = matches!(outcome, ChildStartOutcome::Succeeded { .. });
                let slot = {
                    let mut state = self.shared.state();
                    let found = if keep_entry {
                        state
                            .pending
                            .child_workflows
                            .get(&seq)
                            .map(|entry| (entry.start.clone(), entry.detached))
                    } else {
                        state
                            .pending
                            .child_workflows
                            .remove(&seq)
                            .map(|entry| (entry.start.clone(), entry.detached))
                    };
                    match found {
                        Some((slot, false)) => Some(slot),
                        Some((_, true)) => None,
                        None => {
                            state.fail_task(TaskFailure::nondeterminism(format!(
                                "ResolveChildWorkflowStart for unknown seq {}",
                                seq
                            )));
                            None
                        }
                    }
                };
                if let Some(slot) = slot {
                    slot.resolve(outcome);
                    self.shared.scheduler.mark_progress();
                }
            }

            ActivationJob::ResolveChildWorkflow { seq, resolution } => {
                let entry = self.shared.state().pending.child_workflows.remove(&seq);
                match entry {
                    Some(entry) => {
                        if !entry.detached {
                            entry.result.resolve(resolution);
                            self.shared.scheduler.mark_progress();
                        }
                    }
                    None => self.shared.state().fail_task(TaskFailure::nondeterminism(
                        format!("ResolveChildWorkflow for unknown seq {}", seq),
                    )),
                }
            }

            ActivationJob::ResolveSignalExternalWorkflow { seq, failure } => {
                let entry = self.shared.state().pending.external_signals.remove(&seq);
                match entry {
                    Some(entry) => {
                        entry.slot.resolve(failure);
                        self.shared.scheduler.mark_progress();
                    }
                    None => self.shared.state().fail_task(TaskFailure::nondeterminism(
                        format!("ResolveSignalExternalWorkflow for unknown seq {}", seq),
                    )),
                }
            }

            ActivationJob::SignalWorkflow {
                signal_name,
                input,
                headers,
            } => deliver_signal(
                &self.shared,
                SignalInput {
                    signal_name,
                    input,
                    headers,
                },
            ),

            ActivationJob::DoUpdate {
                update_id,
                update_name,
                input,
                headers,
            } => self.apply_update(UpdateInput {
                update_id,
                update_name,
                input,
                headers,
            }),

            ActivationJob::CancelWorkflow { reason } => {
                let mut state = self.shared.state();
                if state.cancel_requested.is_none() {
                    state.cancel_requested = Some(reason);
                }
            }

            ActivationJob::NotifyHasPatch { patch_id } => {
                self.shared.state().patches.insert(patch_id);
            }

            ActivationJob::UpdateRandomSeed { seed } => {
                self.shared.state().reseed(seed);
            }

            ActivationJob::QueryWorkflow { .. } | ActivationJob::RemoveFromCache { .. } => {
                debug_assert!(false, "job handled by apply_activation");
            }
        }
    }

    /// Two-phase update application: validate synchronously and read-only,
    /// then accept and spawn the handler. Outcomes are recorded by update id
    /// so duplicate deliveries (and replay) reproduce the same responses
    /// without re-running anything.
    fn apply_update(&mut self, input: UpdateInput) {
        let update_id = input.update_id.clone();

        {
            let mut state = self.shared.state();
            match state.update_records.get(&update_id) {
                Some(UpdateRecord::Rejected(failure)) => {
                    let failure = failure.clone();
                    state.push_command(Command::UpdateResponse {
                        update_id,
                        outcome: UpdateOutcome::Rejected(failure),
                    });
                    return;
                }
                Some(UpdateRecord::Completed(result)) => {
                    let result = result.clone();
                    state.push_command(Command::UpdateResponse {
                        update_id,
                        outcome: UpdateOutcome::Completed(result),
                    });
                    return;
                }
                // Handler already in flight; it will respond when done.
                Some(UpdateRecord::Accepted) => return,
                None => {}
            }
        }

        let handler = self.shared.handlers().updates.remove(&input.update_name);
        let Some(mut handler) = handler else {
            let failure = Failure::application(
                "UnknownUpdate",
                format!("no update handler {:?} registered", input.update_name),
            );
            let mut state = self.shared.state();
            state
                .update_records
                .insert(update_id.clone(), UpdateRecord::Rejected(failure.clone()));
            state.push_command(Command::UpdateResponse {
                update_id,
                outcome: UpdateOutcome::Rejected(failure),
            });
            return;
        };

        let validation = match handler.validator.as_mut() {
            Some(validator) => {
                self.shared.state().read_only = true;
                let result = catch_handler_panic(|| validator(&input));
                let violation = {
                    let mut state = self.shared.state();
                    state.read_only = false;
                    state.read_only_violation.take()
                };
                match (result, violation) {
                    (Err(failure), _) => Err(failure),
                    (Ok(()), Some(command)) => Err(Failure::application(
                        "ReadOnlyViolation",
                        format!("update validator buffered command {}", command),
                    )),
                    (Ok(()), None) => Ok(()),
                }
            }
            None => Ok(()),
        };

        match validation {
            Err(failure) => {
                let mut state = self.shared.state();
                state
                    .update_records
                    .insert(update_id.clone(), UpdateRecord::Rejected(failure.clone()));
                state.push_command(Command::UpdateResponse {
                    update_id,
                    outcome: UpdateOutcome::Rejected(failure),
                });
            }
            Ok(()) => {
                {
                    let mut state = self.shared.state();
                    state
                        .update_records
                        .insert(update_id.clone(), UpdateRecord::Accepted);
                    state.push_command(Command::UpdateResponse {
                        update_id: update_id.clone(),
                        outcome: UpdateOutcome::Accepted,
                    });
                }
                let future = (handler.handler)(WfContext::new(self.shared.clone()), input.clone());
                let shared = self.shared.clone();
                self.shared.scheduler.spawn(Box::pin(async move {
                    let result = future.await;
                    let mut state = shared.state();
                    state
                        .update_records
                        .insert(update_id.clone(), UpdateRecord::Completed(result.clone()));
                    state.push_command(Command::UpdateResponse {
                        update_id,
                        outcome: UpdateOutcome::Completed(result),
                    });
                }));
            }
        }

        self.shared
            .handlers()
            .updates
            .insert(input.update_name, handler);
    }

    /// Run collected query jobs synchronously in the read-only phase.
    fn run_queries(
        &mut self,
        queries: Vec<(String, String, Vec<Payload>)>,
    ) -> Vec<QueryResponse> {
        let mut responses = Vec::with_capacity(queries.len());
        for (query_id, query_name, input) in queries {
            let input = QueryInput {
                query_name: query_name.clone(),
                input,
            };

            let handler = {
                let mut table = self.shared.handlers();
                if let Some(handler) = table.queries.remove(&query_name) {
                    Some((handler, false))
                } else {
                    table.dynamic_query.take().map(|handler| (handler, true))
                }
            };

            let result = match handler {
                Some((mut handler, dynamic)) => {
                    self.shared.state().read_only = true;
                    let result = catch_handler_panic(|| handler(input));
                    let violation = {
                        let mut state = self.shared.state();
                        state.read_only = false;
                        state.read_only_violation.take()
                    };
                    {
                        let mut table = self.shared.handlers();
                        if dynamic {
                            table.dynamic_query = Some(handler);
                        } else {
                            table.queries.insert(query_name.clone(), handler);
                        }
                    }
                    match violation {
                        Some(command) => Err(Failure::application(
                            "ReadOnlyViolation",
                            format!("query handler buffered command {}", command),
                        )),
                        None => result,
                    }
                }
                None => Err(Failure::application(
                    "UnknownQuery",
                    format!("no query handler {:?} registered", query_name),
                )),
            };

            responses.push(QueryResponse { query_id, result });
        }
        responses
    }

    /// Convert the run outcome (if any) into the terminal command, then
    /// assemble the completion. A recorded task failure discards everything.
    fn harvest(
        &mut self,
        run_id: String,
        query_responses: Vec<QueryResponse>,
    ) -> ActivationCompletion {
        let mut state = self.shared.state();

        if state.task_failure.is_none() {
            if let Some(outcome) = state.run_outcome.take() {
                let (terminal, next_state) = match outcome {
                    Ok(WfExitValue::Normal(result)) => {
                        (Command::CompleteWorkflow { result }, RunState::Completed)
                    }
                    Ok(WfExitValue::ContinueAsNew(options)) => (
                        Command::ContinueAsNew { options: *options },
                        RunState::ContinuedAsNew,
                    ),
                    Ok(WfExitValue::Cancelled) => (Command::CancelWorkflow, RunState::Completed),
                    Err(failure) if failure.is_cancellation() => {
                        (Command::CancelWorkflow, RunState::Completed)
                    }
                    Err(failure) => (Command::FailWorkflow { failure }, RunState::Failed),
                };
                debug_assert!(
                    !state.commands.iter().any(Command::is_terminal),
                    "terminal command already buffered"
                );
                state.commands.push(terminal);
                state.run_state = next_state;
            } else if state.run_state == RunState::Running {
                state.run_state = RunState::Suspended;
            }
        }

        if let Some(task_failure) = state.task_failure.take() {
            warn!(run_id = %run_id, failure = %task_failure, "activation failed");
            state.commands.clear();
            state.run_outcome = None;
            return ActivationCompletion::fail(run_id, task_failure);
        }

        let commands = std::mem::take(&mut state.commands);
        ActivationCompletion::success(run_id, commands, query_responses)
    }
}

/// Convenience for the worker loop: an activation carrying only an eviction.
pub fn eviction_activation(run_id: impl Into<String>, reason: EvictionReason) -> WorkflowActivation {
    WorkflowActivation {
        run_id: run_id.into(),
        timestamp: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
        is_replaying: false,
        history_length: 0,
        history_size_bytes: 0,
        continue_as_new_suggested: false,
        jobs: vec![ActivationJob::RemoveFromCache {
            reason,
            message: String::new(),
        }],
    }
}
