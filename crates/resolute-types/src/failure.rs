use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which timeout fired, for [`Failure::Timeout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutType {
    StartToClose,
    ScheduleToClose,
    ScheduleToStart,
    Heartbeat,
}

/// Server-side retry disposition attached to activity failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryState {
    InProgress,
    NonRetryableFailure,
    Timeout,
    MaximumAttemptsReached,
    RetryPolicyNotSet,
    CancelRequested,
}

/// Wire-level failure taxonomy.
///
/// Envelope variants (`Activity`, `ChildWorkflow`) always wrap their
/// underlying cause rather than replacing it, so the chain stays inspectable
/// through [`Failure::root_cause`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure {
    /// Structured user failure. `non_retryable` influences server retry.
    Application {
        error_type: String,
        message: String,
        non_retryable: bool,
        details: Vec<Payload>,
    },
    /// Raised on cooperative cancellation.
    Cancelled { message: String },
    /// An operation exceeded one of its configured timeouts.
    Timeout {
        timeout_type: TimeoutType,
        message: String,
    },
    /// Envelope for a failed activity. Always the outer type seen by callers
    /// of `execute_activity`.
    Activity {
        activity_type: String,
        scheduled_seq: u64,
        retry_state: RetryState,
        cause: Box<Failure>,
    },
    /// Envelope for a failed child workflow.
    ChildWorkflow {
        workflow_type: String,
        scheduled_seq: u64,
        cause: Box<Failure>,
    },
    /// The target execution was terminated by the server or an operator.
    Terminated { message: String },
}

impl Failure {
    pub fn application(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Application {
            error_type: error_type.into(),
            message: message.into(),
            non_retryable: false,
            details: Vec::new(),
        }
    }

    pub fn application_non_retryable(
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Application {
            error_type: error_type.into(),
            message: message.into(),
            non_retryable: true,
            details: Vec::new(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn timeout(timeout_type: TimeoutType, message: impl Into<String>) -> Self {
        Self::Timeout {
            timeout_type,
            message: message.into(),
        }
    }

    /// Walk the cause chain to the innermost failure.
    pub fn root_cause(&self) -> &Failure {
        match self {
            Self::Activity { cause, .. } | Self::ChildWorkflow { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// True when the failure, at its root, is a cancellation.
    ///
    /// Used to decide between `CancelWorkflow` and `FailWorkflow` when a run
    /// ends with an error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled { .. })
    }

    /// Variant name for logs and error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Application { .. } => "Application",
            Self::Cancelled { .. } => "Cancelled",
            Self::Timeout { .. } => "Timeout",
            Self::Activity { .. } => "Activity",
            Self::ChildWorkflow { .. } => "ChildWorkflow",
            Self::Terminated { .. } => "Terminated",
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application {
                error_type,
                message,
                ..
            } => write!(f, "{}: {}", error_type, message),
            Self::Cancelled { message } => write!(f, "cancelled: {}", message),
            Self::Timeout {
                timeout_type,
                message,
            } => write!(f, "timeout ({:?}): {}", timeout_type, message),
            Self::Activity {
                activity_type,
                cause,
                ..
            } => write!(f, "activity {} failed: {}", activity_type, cause),
            Self::ChildWorkflow {
                workflow_type,
                cause,
                ..
            } => write!(f, "child workflow {} failed: {}", workflow_type, cause),
            Self::Terminated { message } => write!(f, "terminated: {}", message),
        }
    }
}

impl std::error::Error for Failure {}

/// Why a workflow task (not the workflow itself) failed.
///
/// Task failures cause the server to retry the whole activation; they never
/// end the workflow and are never user-visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskFailureKind {
    /// User code raised something that is not a declared failure, or the
    /// machine hit an internal inconsistency.
    Generic,
    /// A command or resolution did not line up with history during replay.
    Nondeterminism,
}

/// Internal activation-failure record. Converted into a failed completion by
/// the dispatcher; the command buffer is discarded when one of these is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: TaskFailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            kind: TaskFailureKind::Generic,
            message: message.into(),
        }
    }

    pub fn nondeterminism(message: impl Into<String>) -> Self {
        Self {
            kind: TaskFailureKind::Nondeterminism,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TaskFailureKind::Generic => write!(f, "workflow task failure: {}", self.message),
            TaskFailureKind::Nondeterminism => write!(f, "nondeterminism: {}", self.message),
        }
    }
}
