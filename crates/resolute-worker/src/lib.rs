//! The host loop around the workflow execution machine: transport boundary,
//! bounded run cache, pollers, activity dispatch, and graceful shutdown.
//!
//! The worker is stateless across restarts. Everything durable lives on the
//! server; a fresh worker recovers any run by replaying its full history
//! into a new instance.

mod activity;
mod cache;
mod config;
mod error;
mod transport;
mod worker;

pub use activity::{ActivityContext, ActivityFn, ActivityRegistry};
pub use config::{ConfigError, VersioningBehavior, WorkerConfig, WorkerConfigBuilder};
pub use error::WorkerError;
pub use transport::{
    ActivityExecutionResult, ActivityHeartbeat, ActivityTask, ActivityTaskCompletion,
    ActivityTaskStart, TaskToken, TransportError, WorkflowService,
};
pub use worker::Worker;
