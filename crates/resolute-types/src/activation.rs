use crate::command::{Command, Seq};
use crate::failure::{Failure, RetryState, TaskFailure};
use crate::payload::{Headers, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resolution of an activity (regular or local lane).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityResolution {
    Completed {
        result: Payload,
    },
    Failed {
        failure: Failure,
        retry_state: RetryState,
    },
    Cancelled,
}

/// First phase of a child-workflow resolution: did the child start?
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildStartOutcome {
    Succeeded { run_id: String },
    /// e.g. workflow-id collision under the configured reuse policy.
    Failed { failure: Failure },
    Cancelled,
}

/// Second phase: how the started child closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildWorkflowResolution {
    Completed { result: Payload },
    Failed { failure: Failure },
    Cancelled,
}

/// Why the server asked the worker to evict a cached run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionReason {
    CacheFull,
    CacheMiss,
    Nondeterminism,
    LangFail,
    TaskNotFound,
    Unspecified,
    Fatal,
}

/// A single instruction inside an activation batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationJob {
    /// First job of the first activation of a run.
    StartWorkflow {
        workflow_type: String,
        workflow_id: String,
        input: Vec<Payload>,
        headers: Headers,
        random_seed: u64,
    },
    FireTimer {
        seq: Seq,
    },
    ResolveActivity {
        seq: Seq,
        resolution: ActivityResolution,
    },
    ResolveChildWorkflowStart {
        seq: Seq,
        outcome: ChildStartOutcome,
    },
    ResolveChildWorkflow {
        seq: Seq,
        resolution: ChildWorkflowResolution,
    },
    ResolveSignalExternalWorkflow {
        seq: Seq,
        failure: Option<Failure>,
    },
    SignalWorkflow {
        signal_name: String,
        input: Vec<Payload>,
        headers: Headers,
    },
    QueryWorkflow {
        query_id: String,
        query_name: String,
        input: Vec<Payload>,
    },
    DoUpdate {
        update_id: String,
        update_name: String,
        input: Vec<Payload>,
        headers: Headers,
    },
    CancelWorkflow {
        reason: String,
    },
    NotifyHasPatch {
        patch_id: String,
    },
    UpdateRandomSeed {
        seed: u64,
    },
    /// Terminal: drop the cached instance. Never combined with other jobs.
    RemoveFromCache {
        reason: EvictionReason,
        message: String,
    },
}

impl ActivationJob {
    /// Variant name for logs and protocol errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartWorkflow { .. } => "StartWorkflow",
            Self::FireTimer { .. } => "FireTimer",
            Self::ResolveActivity { .. } => "ResolveActivity",
            Self::ResolveChildWorkflowStart { .. } => "ResolveChildWorkflowStart",
            Self::ResolveChildWorkflow { .. } => "ResolveChildWorkflow",
            Self::ResolveSignalExternalWorkflow { .. } => "ResolveSignalExternalWorkflow",
            Self::SignalWorkflow { .. } => "SignalWorkflow",
            Self::QueryWorkflow { .. } => "QueryWorkflow",
            Self::DoUpdate { .. } => "DoUpdate",
            Self::CancelWorkflow { .. } => "CancelWorkflow",
            Self::NotifyHasPatch { .. } => "NotifyHasPatch",
            Self::UpdateRandomSeed { .. } => "UpdateRandomSeed",
            Self::RemoveFromCache { .. } => "RemoveFromCache",
        }
    }
}

/// A server-sent batch of jobs to apply to one workflow run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowActivation {
    pub run_id: String,
    /// Becomes the run's logical time. Nondecreasing across activations.
    pub timestamp: DateTime<Utc>,
    /// True iff the jobs replay events already present in server history.
    pub is_replaying: bool,
    pub history_length: u64,
    /// Surfaced unchanged from the transport; user code may consult it.
    pub history_size_bytes: u64,
    /// Server hint that the run should continue-as-new soon.
    pub continue_as_new_suggested: bool,
    pub jobs: Vec<ActivationJob>,
}

impl WorkflowActivation {
    /// True when the batch is a lone eviction request.
    pub fn is_only_eviction(&self) -> bool {
        self.jobs.len() == 1
            && matches!(self.jobs[0], ActivationJob::RemoveFromCache { .. })
    }
}

/// Answer to a single `QueryWorkflow` job, carried on the completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query_id: String,
    pub result: Result<Payload, Failure>,
}

/// Outcome of applying one activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    Completed {
        commands: Vec<Command>,
        query_responses: Vec<QueryResponse>,
        used_internal_flags: Vec<u32>,
    },
    Failed {
        failure: TaskFailure,
    },
}

/// The worker's reply to an activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationCompletion {
    pub run_id: String,
    pub status: CompletionStatus,
}

impl ActivationCompletion {
    pub fn success(
        run_id: impl Into<String>,
        commands: Vec<Command>,
        query_responses: Vec<QueryResponse>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            status: CompletionStatus::Completed {
                commands,
                query_responses,
                used_internal_flags: Vec::new(),
            },
        }
    }

    pub fn fail(run_id: impl Into<String>, failure: TaskFailure) -> Self {
        Self {
            run_id: run_id.into(),
            status: CompletionStatus::Failed { failure },
        }
    }

    /// Commands of a successful completion; empty for failures.
    pub fn commands(&self) -> &[Command] {
        match &self.status {
            CompletionStatus::Completed { commands, .. } => commands,
            CompletionStatus::Failed { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activation(jobs: Vec<ActivationJob>) -> WorkflowActivation {
        WorkflowActivation {
            run_id: "run-1".into(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            is_replaying: false,
            history_length: 3,
            history_size_bytes: 128,
            continue_as_new_suggested: false,
            jobs,
        }
    }

    #[test]
    fn lone_eviction_is_detected() {
        let act = activation(vec![ActivationJob::RemoveFromCache {
            reason: EvictionReason::CacheFull,
            message: "cache full".into(),
        }]);
        assert!(act.is_only_eviction());

        let mixed = activation(vec![
            ActivationJob::FireTimer { seq: 1 },
            ActivationJob::RemoveFromCache {
                reason: EvictionReason::Fatal,
                message: "bad".into(),
            },
        ]);
        assert!(!mixed.is_only_eviction());
    }

    #[test]
    fn activation_round_trips_through_serde() {
        let act = activation(vec![
            ActivationJob::StartWorkflow {
                workflow_type: "order".into(),
                workflow_id: "wf-1".into(),
                input: vec![Payload::new(b"\"x\"".to_vec())],
                headers: Headers::new(),
                random_seed: 42,
            },
            ActivationJob::SignalWorkflow {
                signal_name: "bump".into(),
                input: vec![],
                headers: Headers::new(),
            },
        ]);

        let encoded = serde_json::to_string(&act).unwrap();
        let decoded: WorkflowActivation = serde_json::from_str(&encoded).unwrap();
        similar_asserts::assert_eq!(decoded, act);
    }

    #[test]
    fn failed_completion_has_no_commands() {
        let completion =
            ActivationCompletion::fail("run-1", TaskFailure::generic("user code panicked"));
        assert!(completion.commands().is_empty());
    }
}
