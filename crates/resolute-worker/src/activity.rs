//! Activity function registry and execution context.
//!
//! Activities are opaque to the workflow machine; this is the thin host-side
//! piece that maps polled activity tasks onto registered async functions,
//! with heartbeat buffering and cooperative cancellation.

use crate::transport::{ActivityHeartbeat, TaskToken};
use resolute_machine::{HandlerFuture, RegistryError};
use resolute_types::{Failure, Payload, PayloadConverter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// A registered activity implementation.
pub type ActivityFn = Arc<
    dyn Fn(ActivityContext, Vec<Payload>) -> HandlerFuture<Result<Payload, Failure>>
        + Send
        + Sync,
>;

/// Handed to every activity invocation.
#[derive(Clone)]
pub struct ActivityContext {
    pub(crate) task_token: TaskToken,
    pub(crate) activity_type: String,
    pub(crate) attempt: u32,
    pub(crate) heartbeats: mpsc::UnboundedSender<ActivityHeartbeat>,
    pub(crate) cancelled: watch::Receiver<bool>,
    pub(crate) converter: Arc<dyn PayloadConverter>,
}

impl ActivityContext {
    pub fn activity_type(&self) -> &str {
        &self.activity_type
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn payload_converter(&self) -> &Arc<dyn PayloadConverter> {
        &self.converter
    }

    /// Buffer a heartbeat; delivery to the server is fire-and-forget.
    pub fn record_heartbeat(&self, details: Vec<Payload>) {
        let _ = self.heartbeats.send(ActivityHeartbeat {
            task_token: self.task_token.clone(),
            details,
        });
    }

    /// True once the server has requested cancellation of this task.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves when cancellation is requested (or the worker shuts the
    /// channel down).
    pub async fn cancelled(&mut self) {
        while !*self.cancelled.borrow() {
            if self.cancelled.changed().await.is_err() {
                return;
            }
        }
    }
}

/// name → activity function. Immutable after worker start.
#[derive(Default)]
pub struct ActivityRegistry {
    functions: HashMap<String, ActivityFn>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        activity_type: impl Into<String>,
        function: impl Fn(ActivityContext, Vec<Payload>) -> HandlerFuture<Result<Payload, Failure>>
        + Send
        + Sync
        + 'static,
    ) -> Result<(), RegistryError> {
        let name = activity_type.into();
        if self.functions.contains_key(&name) {
            return Err(RegistryError::DuplicateHandler {
                kind: "activity",
                name,
            });
        }
        self.functions.insert(name, Arc::new(function));
        Ok(())
    }

    pub(crate) fn get(&self, activity_type: &str) -> Option<ActivityFn> {
        self.functions.get(activity_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_activity_registration_is_rejected() {
        let mut registry = ActivityRegistry::new();
        registry
            .register("echo", |_ctx, input| {
                Box::pin(async move { Ok(input.into_iter().next().unwrap_or_default()) })
            })
            .unwrap();

        let err = registry
            .register("echo", |_ctx, _input| {
                Box::pin(async { Ok(Payload::new(vec![])) })
            })
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DuplicateHandler {
                kind: "activity",
                ..
            }
        ));
    }
}
