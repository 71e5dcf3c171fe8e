//! The transport boundary: everything the worker needs from the host's
//! connection to the server, expressed as one async trait.
//!
//! The worker core never constructs a network client; the host provides an
//! implementation (gRPC in production, channel-backed doubles in tests).

use async_trait::async_trait;
use resolute_types::{ActivationCompletion, Failure, Headers, Payload, WorkflowActivation};

/// Errors surfaced by transport implementations.
///
/// `ShutDown` is the clean end of polling: long-poll calls return it once the
/// transport is closing, and the worker's pollers exit their loops on it.
/// Everything else is fatal to the worker.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is shut down")]
    ShutDown,
    #[error("connection failure: {0}")]
    Connection(String),
    #[error("server rejected request: {0}")]
    Rejected(String),
}

/// Opaque server-issued correlation token for an activity task.
pub type TaskToken = Vec<u8>;

/// Start attributes of a polled activity task.
#[derive(Clone, Debug)]
pub struct ActivityTaskStart {
    pub activity_type: String,
    pub workflow_run_id: String,
    pub input: Vec<Payload>,
    pub headers: Headers,
    pub attempt: u32,
}

/// A polled activity task: either begin executing, or cancel a running one.
#[derive(Clone, Debug)]
pub enum ActivityTask {
    Start {
        task_token: TaskToken,
        start: ActivityTaskStart,
    },
    Cancel {
        task_token: TaskToken,
        reason: String,
    },
}

/// How an activity execution concluded, reported back to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActivityExecutionResult {
    Completed { result: Payload },
    Failed { failure: Failure },
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityTaskCompletion {
    pub task_token: TaskToken,
    pub result: ActivityExecutionResult,
}

#[derive(Clone, Debug)]
pub struct ActivityHeartbeat {
    pub task_token: TaskToken,
    pub details: Vec<Payload>,
}

/// Worker-side server operations. All methods may fail with a transport
/// error; the poll methods block until work is available or shutdown.
#[async_trait]
pub trait WorkflowService: Send + Sync + 'static {
    /// Block until a workflow activation batch is available.
    async fn poll_workflow_activation(&self) -> Result<WorkflowActivation, TransportError>;

    /// Report an activation's completion. Returning `Ok` acknowledges that
    /// the server accepted the commands; the worker holds the run's next
    /// activation until then.
    async fn complete_workflow_activation(
        &self,
        completion: ActivationCompletion,
    ) -> Result<(), TransportError>;

    /// Block until an activity task is available.
    async fn poll_activity_task(&self) -> Result<ActivityTask, TransportError>;

    async fn complete_activity_task(
        &self,
        completion: ActivityTaskCompletion,
    ) -> Result<(), TransportError>;

    /// Fire-and-forget; the worker buffers and drains these in the
    /// background.
    async fn record_activity_heartbeat(
        &self,
        heartbeat: ActivityHeartbeat,
    ) -> Result<(), TransportError>;
}
