use crate::failure::Failure;
use crate::payload::{Headers, Payload, SearchAttributes};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Locally assigned sequence number correlating an outbound command with its
/// eventual resolution job. Monotonic per run, never reused.
pub type Seq = u64;

/// How the worker reacts when user code cancels an in-flight activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityCancellationType {
    /// Send a cancel request and resolve the awaiting task immediately.
    #[default]
    TryCancel,
    /// Send a cancel request; resolve only once the server confirms.
    WaitCancellationCompleted,
    /// Send nothing; detach the resolver and let the activity run out.
    Abandon,
}

/// Versioning directive carried verbatim on activity and child-workflow
/// commands. The worker never interprets it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningIntent {
    #[default]
    Unspecified,
    Compatible,
    Default,
}

/// Retry policy forwarded to the server on schedule commands.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_interval: Option<Duration>,
    pub backoff_coefficient: Option<f64>,
    pub maximum_interval: Option<Duration>,
    pub maximum_attempts: Option<u32>,
    pub non_retryable_error_types: Vec<String>,
}

impl Eq for RetryPolicy {}

/// Options for `ScheduleActivity` and `ScheduleLocalActivity`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityOptions {
    pub task_queue: Option<String>,
    pub schedule_to_close_timeout: Option<Duration>,
    pub schedule_to_start_timeout: Option<Duration>,
    pub start_to_close_timeout: Option<Duration>,
    pub heartbeat_timeout: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
    pub cancellation_type: ActivityCancellationType,
    pub versioning_intent: VersioningIntent,
}

/// What the server does with a still-running child when its parent closes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParentClosePolicy {
    #[default]
    Terminate,
    Abandon,
    RequestCancel,
}

/// Options for `StartChildWorkflow`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildWorkflowOptions {
    pub workflow_id: String,
    pub task_queue: Option<String>,
    pub execution_timeout: Option<Duration>,
    pub run_timeout: Option<Duration>,
    pub task_timeout: Option<Duration>,
    pub parent_close_policy: ParentClosePolicy,
    pub retry_policy: Option<RetryPolicy>,
    pub versioning_intent: VersioningIntent,
}

/// Options for `ContinueAsNew`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueAsNewOptions {
    /// Workflow type for the next run; `None` re-incarnates as the same type.
    pub workflow_type: Option<String>,
    pub task_queue: Option<String>,
    pub run_timeout: Option<Duration>,
    pub task_timeout: Option<Duration>,
    pub input: Vec<Payload>,
    pub headers: Headers,
    pub search_attributes: SearchAttributes,
}

/// Target of `SignalExternalWorkflow`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalTarget {
    /// A child started by this run, addressed by its start sequence number.
    ChildWorkflow { seq: Seq },
    /// An arbitrary execution in some namespace.
    External {
        namespace: String,
        workflow_id: String,
        run_id: Option<String>,
    },
}

/// Three-phase outcome of a workflow update, reported via `UpdateResponse`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOutcome {
    /// Validation passed; the handler is running.
    Accepted,
    /// Handler finished. Carries its result or failure.
    Completed(Result<Payload, Failure>),
    /// Validator threw; the handler never ran.
    Rejected(Failure),
}

/// A worker-sent intent appended to the run's history.
///
/// Commands are harvested from the instance's buffer in the deterministic
/// order user tasks emitted them and shipped inside the activation completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    StartTimer {
        seq: Seq,
        duration: Duration,
    },
    CancelTimer {
        seq: Seq,
    },
    ScheduleActivity {
        seq: Seq,
        activity_type: String,
        input: Vec<Payload>,
        options: ActivityOptions,
    },
    RequestCancelActivity {
        seq: Seq,
    },
    /// Same shape as `ScheduleActivity`, different dispatch lane.
    ScheduleLocalActivity {
        seq: Seq,
        activity_type: String,
        input: Vec<Payload>,
        options: ActivityOptions,
    },
    RequestCancelLocalActivity {
        seq: Seq,
    },
    StartChildWorkflow {
        seq: Seq,
        workflow_type: String,
        input: Vec<Payload>,
        options: ChildWorkflowOptions,
    },
    CancelChildWorkflow {
        seq: Seq,
    },
    SignalExternalWorkflow {
        seq: Seq,
        target: SignalTarget,
        signal_name: String,
        input: Vec<Payload>,
    },
    CompleteWorkflow {
        result: Payload,
    },
    FailWorkflow {
        failure: Failure,
    },
    CancelWorkflow,
    ContinueAsNew {
        options: ContinueAsNewOptions,
    },
    UpsertSearchAttributes {
        attributes: SearchAttributes,
    },
    UpdateResponse {
        update_id: String,
        outcome: UpdateOutcome,
    },
}

impl Command {
    /// Variant name for error messages and logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartTimer { .. } => "StartTimer",
            Self::CancelTimer { .. } => "CancelTimer",
            Self::ScheduleActivity { .. } => "ScheduleActivity",
            Self::RequestCancelActivity { .. } => "RequestCancelActivity",
            Self::ScheduleLocalActivity { .. } => "ScheduleLocalActivity",
            Self::RequestCancelLocalActivity { .. } => "RequestCancelLocalActivity",
            Self::StartChildWorkflow { .. } => "StartChildWorkflow",
            Self::CancelChildWorkflow { .. } => "CancelChildWorkflow",
            Self::SignalExternalWorkflow { .. } => "SignalExternalWorkflow",
            Self::CompleteWorkflow { .. } => "CompleteWorkflow",
            Self::FailWorkflow { .. } => "FailWorkflow",
            Self::CancelWorkflow => "CancelWorkflow",
            Self::ContinueAsNew { .. } => "ContinueAsNew",
            Self::UpsertSearchAttributes { .. } => "UpsertSearchAttributes",
            Self::UpdateResponse { .. } => "UpdateResponse",
        }
    }

    /// Whether this command ends the run. At most one terminal command may
    /// appear per run, and it must be the last command of its activation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CompleteWorkflow { .. }
                | Self::FailWorkflow { .. }
                | Self::CancelWorkflow
                | Self::ContinueAsNew { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(bytes: &[u8]) -> Payload {
        Payload::new(bytes.to_vec())
    }

    #[test]
    fn terminal_commands_are_exactly_the_four_closers() {
        let terminal = [
            Command::CompleteWorkflow {
                result: payload(b"done"),
            },
            Command::FailWorkflow {
                failure: Failure::application("E", "m"),
            },
            Command::CancelWorkflow,
            Command::ContinueAsNew {
                options: ContinueAsNewOptions::default(),
            },
        ];
        for cmd in &terminal {
            assert!(cmd.is_terminal(), "{} should be terminal", cmd.name());
        }

        let open = [
            Command::StartTimer {
                seq: 1,
                duration: Duration::seconds(5),
            },
            Command::RequestCancelActivity { seq: 2 },
            Command::UpdateResponse {
                update_id: "u1".into(),
                outcome: UpdateOutcome::Accepted,
            },
        ];
        for cmd in &open {
            assert!(!cmd.is_terminal(), "{} should not be terminal", cmd.name());
        }
    }

    #[test]
    fn commands_round_trip_through_serde() {
        let original = Command::ScheduleActivity {
            seq: 9,
            activity_type: "send_email".into(),
            input: vec![payload(b"\"to\"")],
            options: ActivityOptions {
                start_to_close_timeout: Some(Duration::seconds(30)),
                cancellation_type: ActivityCancellationType::WaitCancellationCompleted,
                retry_policy: Some(RetryPolicy {
                    maximum_attempts: Some(3),
                    ..Default::default()
                }),
                ..Default::default()
            },
        };

        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: Command = serde_json::from_str(&encoded).unwrap();
        similar_asserts::assert_eq!(decoded, original);
    }

    #[test]
    fn signal_target_round_trips_both_forms() {
        for target in [
            SignalTarget::ChildWorkflow { seq: 4 },
            SignalTarget::External {
                namespace: "default".into(),
                workflow_id: "wf-1".into(),
                run_id: None,
            },
        ] {
            let encoded = serde_json::to_string(&target).unwrap();
            let decoded: SignalTarget = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, target);
        }
    }
}
