//! The workflow execution machine: a deterministic, cooperatively scheduled
//! runtime that applies server-sent activation batches to user workflow code
//! and harvests the resulting command batches.
//!
//! The pieces, leaves first:
//! - [`scheduler`]: single-threaded FIFO future scheduler, one per instance.
//! - [`pending`]: sequence-keyed tables correlating outbound commands with
//!   their eventual resolutions.
//! - [`context`]: the [`WfContext`] surface user workflow code programs
//!   against (timers, activities, children, conditions, signals).
//! - [`instance`]: per-run state (command buffer, logical time, random
//!   source, handler table).
//! - [`dispatcher`]: activation application and completion assembly.
//! - [`registry`]: per-workflow-type handler sets and the worker-wide
//!   type registry.
//!
//! Determinism is the load-bearing property: applying the same activations
//! to a fresh instance must reproduce the same commands in the same order,
//! because the server recovers worker state purely by replaying history.

mod context;
mod dispatcher;
mod instance;
mod pending;
mod registry;
mod scheduler;

pub use context::{
    ActivityHandle, ChildWorkflowHandle, PendingChildWorkflow, TimerHandle, WfContext,
};
pub use dispatcher::{DispatchOutcome, eviction_activation};
pub use instance::WorkflowInstance;
pub use registry::{
    HandlerFuture, QueryInput, RegistryError, SignalInput, UpdateHandler, UpdateInput,
    ValidatorFn, WfExitValue, WorkflowFactory, WorkflowHandlers, WorkflowHandlersBuilder,
    WorkflowRegistry,
};
