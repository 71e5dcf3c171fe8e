//! Wire-level data model for the Resolute worker core: payloads, commands,
//! activations, completions, failures, and the run lifecycle.
//!
//! Everything here is plain data with serde support. The execution machinery
//! lives in `resolute-machine`; the host loop in `resolute-worker`.

pub mod activation;
pub mod command;
pub mod converter;
pub mod failure;
pub mod payload;
pub mod state;

pub use activation::{
    ActivationCompletion, ActivationJob, ActivityResolution, ChildStartOutcome,
    ChildWorkflowResolution, CompletionStatus, EvictionReason, QueryResponse, WorkflowActivation,
};
pub use command::{
    ActivityCancellationType, ActivityOptions, ChildWorkflowOptions, Command,
    ContinueAsNewOptions, ParentClosePolicy, RetryPolicy, Seq, SignalTarget, UpdateOutcome,
    VersioningIntent,
};
pub use converter::{ConvertError, JsonPayloadConverter, PayloadConverter, PayloadConverterExt};
pub use failure::{Failure, RetryState, TaskFailure, TaskFailureKind, TimeoutType};
pub use payload::{ENCODING_KEY, Headers, Payload, SearchAttributes};
pub use state::RunState;
