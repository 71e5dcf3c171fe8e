//! The poll/dispatch/complete loop.
//!
//! `Worker::run` spawns a set of workflow pollers and activity pollers (one
//! task each, bounded by the configured poller counts). Workflow activations
//! are processed inline by the poller that received them: the instance is
//! checked out of the shared cache for exclusive use, the activation is
//! applied, and the completion is acknowledged by the server before the
//! instance returns to the cache. Activity tasks are spawned onto their
//! poller's join set so a slow activity never blocks polling.
//!
//! Shutdown is two-phase: `initiate_shutdown` stops all polling; each poller
//! then drains its in-flight work within the configured grace period before
//! `run` returns. Transport and registration errors are fatal and propagate
//! out of `run`.

use crate::activity::{ActivityContext, ActivityRegistry};
use crate::cache::RunCache;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::transport::{
    ActivityExecutionResult, ActivityHeartbeat, ActivityTask, ActivityTaskCompletion, TaskToken,
    TransportError, WorkflowService,
};
use resolute_machine::{WorkflowInstance, WorkflowRegistry};
use resolute_types::{ActivationCompletion, ActivationJob, TaskFailure, WorkflowActivation};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex as TokioMutex, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

type CancelSenders = Arc<StdMutex<HashMap<TaskToken, watch::Sender<bool>>>>;

/// A worker bound to one task queue: polls the server, drives workflow
/// instances, executes activities, and reports results.
pub struct Worker<S: WorkflowService> {
    transport: Arc<S>,
    registry: Arc<WorkflowRegistry>,
    activities: Arc<ActivityRegistry>,
    config: Arc<WorkerConfig>,
    cache: Arc<TokioMutex<RunCache>>,
    shutdown: watch::Sender<bool>,
}

impl<S: WorkflowService> Worker<S> {
    pub fn new(
        config: WorkerConfig,
        transport: S,
        registry: WorkflowRegistry,
        activities: ActivityRegistry,
    ) -> Self {
        let cache = RunCache::new(config.max_cached_workflows);
        let (shutdown, _) = watch::channel(false);
        Self {
            transport: Arc::new(transport),
            registry: Arc::new(registry),
            activities: Arc::new(activities),
            config: Arc::new(config),
            cache: Arc::new(TokioMutex::new(cache)),
            shutdown,
        }
    }

    /// Phase one of shutdown: stop polling. In-flight work keeps draining;
    /// `run` returns once finalization completes.
    pub fn initiate_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Number of currently cached workflow instances.
    pub async fn cached_workflows(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Run until shutdown or a fatal error.
    pub async fn run(&self) -> Result<(), WorkerError> {
        info!(
            namespace = %self.config.namespace,
            task_queue = %self.config.task_queue,
            identity = %self.config.identity,
            "starting worker"
        );

        let (heartbeat_tx, mut heartbeat_rx) = mpsc::unbounded_channel::<ActivityHeartbeat>();
        let heartbeat_transport = self.transport.clone();
        let heartbeat_drain = tokio::spawn(async move {
            while let Some(heartbeat) = heartbeat_rx.recv().await {
                if let Err(err) = heartbeat_transport.record_activity_heartbeat(heartbeat).await {
                    warn!(error = %err, "dropping activity heartbeat");
                }
            }
        });

        let workflow_slots = Arc::new(Semaphore::new(self.config.max_outstanding_workflow_tasks));
        let activity_slots = Arc::new(Semaphore::new(self.config.max_outstanding_activities));
        let cancel_senders: CancelSenders = Arc::new(StdMutex::new(HashMap::new()));

        let mut pollers: JoinSet<Result<(), WorkerError>> = JoinSet::new();
        for _ in 0..self.config.max_workflow_pollers {
            pollers.spawn(workflow_poller(
                self.transport.clone(),
                self.registry.clone(),
                self.cache.clone(),
                workflow_slots.clone(),
                self.shutdown.subscribe(),
            ));
        }
        for _ in 0..self.config.max_activity_pollers {
            pollers.spawn(activity_poller(
                self.transport.clone(),
                self.activities.clone(),
                self.config.clone(),
                activity_slots.clone(),
                cancel_senders.clone(),
                heartbeat_tx.clone(),
                self.shutdown.subscribe(),
            ));
        }
        drop(heartbeat_tx);

        let mut first_error = None;
        while let Some(joined) = pollers.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) => Err(WorkerError::Fatal(format!(
                    "poller task aborted: {}",
                    join_error
                ))),
            };
            if let Err(err) = result {
                error!(error = %err, "poller failed; shutting worker down");
                if first_error.is_none() {
                    first_error = Some(err);
                }
                self.initiate_shutdown();
            }
        }

        let _ = heartbeat_drain.await;
        info!("worker stopped");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The workflow type named by the batch's start job, if any.
fn start_workflow_type(activation: &WorkflowActivation) -> Option<&str> {
    activation.jobs.iter().find_map(|job| match job {
        ActivationJob::StartWorkflow { workflow_type, .. } => Some(workflow_type.as_str()),
        _ => None,
    })
}

async fn workflow_poller<S: WorkflowService>(
    transport: Arc<S>,
    registry: Arc<WorkflowRegistry>,
    cache: Arc<TokioMutex<RunCache>>,
    slots: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), WorkerError> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            polled = transport.poll_workflow_activation() => match polled {
                Err(TransportError::ShutDown) => break,
                Err(err) => return Err(err.into()),
                Ok(activation) => {
                    let _permit = slots
                        .acquire()
                        .await
                        .map_err(|_| WorkerError::Fatal("workflow slot semaphore closed".into()))?;
                    process_activation(&transport, &registry, &cache, activation).await?;
                }
            }
        }
    }
    Ok(())
}

/// Apply one activation: check the instance out of the cache (or build a
/// fresh one from the start job), dispatch, and acknowledge the completion
/// before the instance becomes available again.
async fn process_activation<S: WorkflowService>(
    transport: &Arc<S>,
    registry: &Arc<WorkflowRegistry>,
    cache: &Arc<TokioMutex<RunCache>>,
    activation: WorkflowActivation,
) -> Result<(), WorkerError> {
    let run_id = activation.run_id.clone();

    let checked_out = cache.lock().await.take(&run_id);
    let mut instance = match checked_out {
        Some(instance) => instance,
        None => match start_workflow_type(&activation) {
            Some(workflow_type) => match registry.instantiate(workflow_type) {
                Ok(handlers) => WorkflowInstance::new(run_id.clone(), handlers),
                Err(err) => {
                    warn!(run_id = %run_id, error = %err, "activation for unregistered workflow type");
                    transport
                        .complete_workflow_activation(ActivationCompletion::fail(
                            run_id,
                            TaskFailure::generic(err.to_string()),
                        ))
                        .await?;
                    return Ok(());
                }
            },
            None => {
                // Cache miss without a start job: fail the task so the
                // server re-sends the run with full history for replay.
                debug!(run_id = %run_id, "cache miss; requesting full-history replay");
                transport
                    .complete_workflow_activation(ActivationCompletion::fail(
                        run_id,
                        TaskFailure::generic("no cached state for run; full history required"),
                    ))
                    .await?;
                return Ok(());
            }
        },
    };

    let outcome = instance.apply_activation(activation);
    let closed = instance.run_state().is_terminal();
    transport
        .complete_workflow_activation(outcome.completion)
        .await?;

    if outcome.evict || closed {
        debug!(run_id = %run_id, evict = outcome.evict, closed, "dropping workflow instance");
    } else if let Some(evicted) = cache.lock().await.put(run_id, instance) {
        debug!(run_id = %evicted, "evicted least recently used run from cache");
    }
    Ok(())
}

async fn activity_poller<S: WorkflowService>(
    transport: Arc<S>,
    activities: Arc<ActivityRegistry>,
    config: Arc<WorkerConfig>,
    slots: Arc<Semaphore>,
    cancel_senders: CancelSenders,
    heartbeats: mpsc::UnboundedSender<ActivityHeartbeat>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), WorkerError> {
    let mut in_flight = JoinSet::new();
    let result = loop {
        tokio::select! {
            _ = shutdown.changed() => break Ok(()),
            polled = transport.poll_activity_task() => match polled {
                Err(TransportError::ShutDown) => break Ok(()),
                Err(err) => break Err(WorkerError::from(err)),
                Ok(ActivityTask::Start { task_token, start }) => {
                    let Ok(permit) = slots.clone().acquire_owned().await else {
                        break Ok(());
                    };
                    let Some(function) = activities.get(&start.activity_type) else {
                        warn!(activity_type = %start.activity_type, "activity task for unregistered type");
                        let completion = ActivityTaskCompletion {
                            task_token,
                            result: ActivityExecutionResult::Failed {
                                failure: resolute_types::Failure::application_non_retryable(
                                    "NotRegistered",
                                    format!(
                                        "activity type {:?} is not registered on this worker",
                                        start.activity_type
                                    ),
                                ),
                            },
                        };
                        if let Err(err) = transport.complete_activity_task(completion).await {
                            break Err(WorkerError::from(err));
                        }
                        continue;
                    };

                    let (cancel_tx, cancel_rx) = watch::channel(false);
                    lock_cancels(&cancel_senders).insert(task_token.clone(), cancel_tx);
                    let context = ActivityContext {
                        task_token: task_token.clone(),
                        activity_type: start.activity_type.clone(),
                        attempt: start.attempt,
                        heartbeats: heartbeats.clone(),
                        cancelled: cancel_rx,
                        converter: config.data_converter.clone(),
                    };
                    let transport = transport.clone();
                    let cancel_senders = cancel_senders.clone();
                    in_flight.spawn(async move {
                        let result = function(context, start.input).await;
                        lock_cancels(&cancel_senders).remove(&task_token);
                        let result = match result {
                            Ok(payload) => ActivityExecutionResult::Completed { result: payload },
                            Err(failure) if failure.is_cancellation() => {
                                ActivityExecutionResult::Cancelled
                            }
                            Err(failure) => ActivityExecutionResult::Failed { failure },
                        };
                        if let Err(err) = transport
                            .complete_activity_task(ActivityTaskCompletion { task_token, result })
                            .await
                        {
                            warn!(error = %err, "failed to report activity completion");
                        }
                        drop(permit);
                    });
                }
                Ok(ActivityTask::Cancel { task_token, reason }) => {
                    debug!(%reason, "activity cancellation requested");
                    if let Some(sender) = lock_cancels(&cancel_senders).get(&task_token) {
                        let _ = sender.send(true);
                    }
                }
            }
        }
    };

    // Finalization: give in-flight activities the grace period, then abort.
    let drained = tokio::time::timeout(config.graceful_shutdown_period, async {
        while in_flight.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("graceful shutdown period elapsed; aborting in-flight activities");
    }
    result
}

fn lock_cancels(
    senders: &CancelSenders,
) -> std::sync::MutexGuard<'_, HashMap<TaskToken, watch::Sender<bool>>> {
    senders.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ActivityTaskStart;
    use async_trait::async_trait;
    use resolute_machine::{WfExitValue, WorkflowHandlers};
    use resolute_types::{
        CompletionStatus, Command, Failure, Headers, Payload,
    };
    use std::time::Duration;
    use tokio::time::timeout;

    /// Channel-backed transport double. Poll methods drain their channel and
    /// report `ShutDown` once the test side closes it; completions are
    /// forwarded to the test for inspection. An injected transport error is
    /// returned from the next workflow poll to exercise the fatal path.
    struct MockTransport {
        activations: TokioMutex<mpsc::UnboundedReceiver<Result<WorkflowActivation, TransportError>>>,
        completions: mpsc::UnboundedSender<ActivationCompletion>,
        activity_tasks: TokioMutex<mpsc::UnboundedReceiver<ActivityTask>>,
        activity_completions: mpsc::UnboundedSender<ActivityTaskCompletion>,
        heartbeats: mpsc::UnboundedSender<ActivityHeartbeat>,
    }

    struct TestHarness {
        activations: mpsc::UnboundedSender<Result<WorkflowActivation, TransportError>>,
        completions: mpsc::UnboundedReceiver<ActivationCompletion>,
        activity_tasks: mpsc::UnboundedSender<ActivityTask>,
        activity_completions: mpsc::UnboundedReceiver<ActivityTaskCompletion>,
        heartbeats: mpsc::UnboundedReceiver<ActivityHeartbeat>,
    }

    fn mock_transport() -> (MockTransport, TestHarness) {
        let (activation_tx, activation_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (task_completion_tx, task_completion_rx) = mpsc::unbounded_channel();
        let (heartbeat_tx, heartbeat_rx) = mpsc::unbounded_channel();
        (
            MockTransport {
                activations: TokioMutex::new(activation_rx),
                completions: completion_tx,
                activity_tasks: TokioMutex::new(task_rx),
                activity_completions: task_completion_tx,
                heartbeats: heartbeat_tx,
            },
            TestHarness {
                activations: activation_tx,
                completions: completion_rx,
                activity_tasks: task_tx,
                activity_completions: task_completion_rx,
                heartbeats: heartbeat_rx,
            },
        )
    }

    #[async_trait]
    impl WorkflowService for MockTransport {
        async fn poll_workflow_activation(&self) -> Result<WorkflowActivation, TransportError> {
            match self.activations.lock().await.recv().await {
                Some(polled) => polled,
                None => Err(TransportError::ShutDown),
            }
        }

        async fn complete_workflow_activation(
            &self,
            completion: ActivationCompletion,
        ) -> Result<(), TransportError> {
            let _ = self.completions.send(completion);
            Ok(())
        }

        async fn poll_activity_task(&self) -> Result<ActivityTask, TransportError> {
            match self.activity_tasks.lock().await.recv().await {
                Some(task) => Ok(task),
                None => Err(TransportError::ShutDown),
            }
        }

        async fn complete_activity_task(
            &self,
            completion: ActivityTaskCompletion,
        ) -> Result<(), TransportError> {
            let _ = self.activity_completions.send(completion);
            Ok(())
        }

        async fn record_activity_heartbeat(
            &self,
            heartbeat: ActivityHeartbeat,
        ) -> Result<(), TransportError> {
            let _ = self.heartbeats.send(heartbeat);
            Ok(())
        }
    }

    fn payload(bytes: &[u8]) -> Payload {
        Payload::new(bytes.to_vec())
    }

    fn echo_registry() -> WorkflowRegistry {
        let mut registry = WorkflowRegistry::new();
        registry
            .register("echo", || {
                WorkflowHandlers::builder(|_ctx, input| {
                    Box::pin(async move {
                        let first = input.into_iter().next().unwrap_or_default();
                        Ok(WfExitValue::Normal(first))
                    })
                })
                .build()
            })
            .unwrap();
        registry
    }

    fn start_activation(run_id: &str, workflow_type: &str, input: &[u8]) -> WorkflowActivation {
        WorkflowActivation {
            run_id: run_id.into(),
            timestamp: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            is_replaying: false,
            history_length: 1,
            history_size_bytes: 64,
            continue_as_new_suggested: false,
            jobs: vec![ActivationJob::StartWorkflow {
                workflow_type: workflow_type.into(),
                workflow_id: format!("wf-{}", run_id),
                input: vec![payload(input)],
                headers: Headers::new(),
                random_seed: 1,
            }],
        }
    }

    fn small_config() -> WorkerConfig {
        WorkerConfig::builder("default", "orders")
            .max_workflow_pollers(1)
            .max_activity_pollers(1)
            .graceful_shutdown_period(Duration::from_secs(1))
            .build()
            .unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn workflow_activation_round_trips_to_completion() {
        let (transport, mut harness) = mock_transport();
        let worker = Arc::new(Worker::new(
            small_config(),
            transport,
            echo_registry(),
            ActivityRegistry::new(),
        ));

        let runner = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        harness
            .activations
            .send(Ok(start_activation("run-1", "echo", b"hello")))
            .unwrap();

        let completion = timeout(Duration::from_secs(5), harness.completions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completion.run_id, "run-1");
        similar_asserts::assert_eq!(
            completion.commands(),
            &[Command::CompleteWorkflow {
                result: payload(b"hello")
            }][..]
        );

        worker.initiate_shutdown();
        timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn terminal_run_is_dropped_from_cache() {
        let (transport, mut harness) = mock_transport();
        let worker = Arc::new(Worker::new(
            small_config(),
            transport,
            echo_registry(),
            ActivityRegistry::new(),
        ));
        let runner = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        harness
            .activations
            .send(Ok(start_activation("run-done", "echo", b"x")))
            .unwrap();
        timeout(Duration::from_secs(5), harness.completions.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(worker.cached_workflows().await, 0);

        worker.initiate_shutdown();
        timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn cache_miss_without_start_job_requests_full_history() {
        let (transport, mut harness) = mock_transport();
        let worker = Arc::new(Worker::new(
            small_config(),
            transport,
            echo_registry(),
            ActivityRegistry::new(),
        ));
        let runner = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        harness
            .activations
            .send(Ok(WorkflowActivation {
                run_id: "run-unknown".into(),
                timestamp: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
                is_replaying: false,
                history_length: 5,
                history_size_bytes: 512,
                continue_as_new_suggested: false,
                jobs: vec![ActivationJob::SignalWorkflow {
                    signal_name: "poke".into(),
                    input: vec![],
                    headers: Headers::new(),
                }],
            }))
            .unwrap();

        let completion = timeout(Duration::from_secs(5), harness.completions.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            completion.status,
            CompletionStatus::Failed { .. }
        ));

        worker.initiate_shutdown();
        timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn unregistered_workflow_type_fails_the_task() {
        let (transport, mut harness) = mock_transport();
        let worker = Arc::new(Worker::new(
            small_config(),
            transport,
            echo_registry(),
            ActivityRegistry::new(),
        ));
        let runner = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        harness
            .activations
            .send(Ok(start_activation("run-2", "ghost", b"x")))
            .unwrap();

        let completion = timeout(Duration::from_secs(5), harness.completions.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            completion.status,
            CompletionStatus::Failed { .. }
        ));

        worker.initiate_shutdown();
        timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn activity_task_executes_registered_function() {
        let (transport, mut harness) = mock_transport();
        let mut activities = ActivityRegistry::new();
        activities
            .register("reverse", |ctx, input| {
                Box::pin(async move {
                    ctx.record_heartbeat(vec![]);
                    let mut data = input.into_iter().next().unwrap_or_default().data;
                    data.reverse();
                    Ok(Payload::new(data))
                })
            })
            .unwrap();
        let worker = Arc::new(Worker::new(
            small_config(),
            transport,
            echo_registry(),
            activities,
        ));
        let runner = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        harness
            .activity_tasks
            .send(ActivityTask::Start {
                task_token: b"tok-1".to_vec(),
                start: ActivityTaskStart {
                    activity_type: "reverse".into(),
                    workflow_run_id: "run-1".into(),
                    input: vec![payload(b"abc")],
                    headers: Headers::new(),
                    attempt: 1,
                },
            })
            .unwrap();

        let completion = timeout(Duration::from_secs(5), harness.activity_completions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completion.task_token, b"tok-1".to_vec());
        assert_eq!(
            completion.result,
            ActivityExecutionResult::Completed {
                result: payload(b"cba")
            }
        );

        let heartbeat = timeout(Duration::from_secs(5), harness.heartbeats.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(heartbeat.task_token, b"tok-1".to_vec());

        worker.initiate_shutdown();
        timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn cancelled_activity_reports_cancelled_result() {
        let (transport, mut harness) = mock_transport();
        let mut activities = ActivityRegistry::new();
        activities
            .register("wait_for_cancel", |mut ctx, _input| {
                Box::pin(async move {
                    ctx.cancelled().await;
                    Err(Failure::cancelled("activity observed cancel"))
                })
            })
            .unwrap();
        let worker = Arc::new(Worker::new(
            small_config(),
            transport,
            echo_registry(),
            activities,
        ));
        let runner = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        harness
            .activity_tasks
            .send(ActivityTask::Start {
                task_token: b"tok-2".to_vec(),
                start: ActivityTaskStart {
                    activity_type: "wait_for_cancel".into(),
                    workflow_run_id: "run-1".into(),
                    input: vec![],
                    headers: Headers::new(),
                    attempt: 1,
                },
            })
            .unwrap();
        harness
            .activity_tasks
            .send(ActivityTask::Cancel {
                task_token: b"tok-2".to_vec(),
                reason: "workflow canceled it".into(),
            })
            .unwrap();

        let completion = timeout(Duration::from_secs(5), harness.activity_completions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completion.result, ActivityExecutionResult::Cancelled);

        worker.initiate_shutdown();
        timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn transport_error_is_fatal_to_the_worker() {
        let (transport, harness) = mock_transport();
        let worker = Arc::new(Worker::new(
            small_config(),
            transport,
            echo_registry(),
            ActivityRegistry::new(),
        ));
        let runner = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        harness
            .activations
            .send(Err(TransportError::Connection("connection reset".into())))
            .unwrap();

        let result = timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
        assert!(matches!(
            result,
            Err(WorkerError::Transport(TransportError::Connection(_)))
        ));
    }

    #[test_log::test(tokio::test)]
    async fn cache_overflow_evicts_oldest_run() {
        let (transport, mut harness) = mock_transport();
        let config = WorkerConfig::builder("default", "orders")
            .max_workflow_pollers(1)
            .max_activity_pollers(1)
            .max_cached_workflows(1)
            .graceful_shutdown_period(Duration::from_secs(1))
            .build()
            .unwrap();

        // A workflow that stays open awaiting a signal it never gets.
        let mut registry = WorkflowRegistry::new();
        registry
            .register("waiter", || {
                WorkflowHandlers::builder(|ctx, _input| {
                    Box::pin(async move {
                        ctx.condition(|| false).await?;
                        Ok(WfExitValue::Normal(Payload::new(vec![])))
                    })
                })
                .build()
            })
            .unwrap();

        let worker = Arc::new(Worker::new(
            config,
            transport,
            registry,
            ActivityRegistry::new(),
        ));
        let runner = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        for run in ["run-a", "run-b"] {
            harness
                .activations
                .send(Ok(start_activation(run, "waiter", b"")))
                .unwrap();
            timeout(Duration::from_secs(5), harness.completions.recv())
                .await
                .unwrap()
                .unwrap();
        }

        assert_eq!(worker.cached_workflows().await, 1, "oldest run evicted");

        worker.initiate_shutdown();
        timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
