//! Handler registries (one per workflow type) and the worker-wide registry.
//!
//! A [`WorkflowRegistry`] maps workflow type names to factories. Each factory
//! builds a fresh [`WorkflowHandlers`] set for one run: the run entry plus
//! signal, query, and update handlers by name. Duplicate names are rejected
//! when the set is built; the registry itself rejects duplicate type names
//! and becomes immutable once the worker takes it by value at start.

use crate::context::WfContext;
use resolute_types::{ContinueAsNewOptions, Failure, Headers, Payload};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by async handlers.
pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// How a run entry concluded, other than by failing.
#[derive(Debug)]
pub enum WfExitValue {
    /// Normal completion with a result payload.
    Normal(Payload),
    /// Re-incarnate the run with a fresh history.
    ContinueAsNew(Box<ContinueAsNewOptions>),
    /// The run acknowledged a cancellation request and unwound cleanly.
    Cancelled,
}

/// Input delivered to a signal handler.
#[derive(Clone, Debug)]
pub struct SignalInput {
    pub signal_name: String,
    pub input: Vec<Payload>,
    pub headers: Headers,
}

/// Input delivered to a query handler.
#[derive(Clone, Debug)]
pub struct QueryInput {
    pub query_name: String,
    pub input: Vec<Payload>,
}

/// Input delivered to an update validator and handler.
#[derive(Clone, Debug)]
pub struct UpdateInput {
    pub update_id: String,
    pub update_name: String,
    pub input: Vec<Payload>,
    pub headers: Headers,
}

/// Workflow run entry: consumes the start input, drives the run to an exit.
pub type RunFn =
    Box<dyn FnOnce(WfContext, Vec<Payload>) -> HandlerFuture<Result<WfExitValue, Failure>> + Send>;

/// Signal handlers run as independent scheduler tasks and may await.
pub type SignalFn =
    Box<dyn FnMut(WfContext, SignalInput) -> HandlerFuture<Result<(), Failure>> + Send>;

/// Query handlers run synchronously inside the activation and must not
/// buffer commands.
pub type QueryFn = Box<dyn FnMut(QueryInput) -> Result<Payload, Failure> + Send>;

/// Update validators run synchronously and read-only before the handler.
pub type ValidatorFn = Box<dyn FnMut(&UpdateInput) -> Result<(), Failure> + Send>;

/// Update handlers run as scheduler tasks after acceptance.
pub type UpdateFn =
    Box<dyn FnMut(WfContext, UpdateInput) -> HandlerFuture<Result<Payload, Failure>> + Send>;

pub struct UpdateHandler {
    pub(crate) validator: Option<ValidatorFn>,
    pub(crate) handler: UpdateFn,
}

/// Registration-time errors. Fatal to worker startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("workflow type {name:?} registered twice")]
    DuplicateWorkflowType { name: String },
    #[error("duplicate {kind} handler {name:?}")]
    DuplicateHandler { kind: &'static str, name: String },
    #[error("dynamic {kind} handler registered twice")]
    DuplicateDynamicHandler { kind: &'static str },
    #[error("no workflow type {name:?} is registered")]
    UnknownWorkflowType { name: String },
}

/// Mutable handler storage for one live run. Starts from the registry's
/// per-type set; signal/query/update handlers may be added later through the
/// workflow context.
#[derive(Default)]
pub(crate) struct HandlerTable {
    pub(crate) run: Option<RunFn>,
    pub(crate) signals: HashMap<String, SignalFn>,
    pub(crate) dynamic_signal: Option<SignalFn>,
    pub(crate) queries: HashMap<String, QueryFn>,
    pub(crate) dynamic_query: Option<QueryFn>,
    pub(crate) updates: HashMap<String, UpdateHandler>,
}

/// The complete handler set for one workflow type, produced by a factory per
/// run.
pub struct WorkflowHandlers {
    pub(crate) table: HandlerTable,
}

impl std::fmt::Debug for WorkflowHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandlers").finish_non_exhaustive()
    }
}

impl WorkflowHandlers {
    /// Start building a handler set from its run entry.
    pub fn builder(
        run: impl FnOnce(WfContext, Vec<Payload>) -> HandlerFuture<Result<WfExitValue, Failure>>
        + Send
        + 'static,
    ) -> WorkflowHandlersBuilder {
        WorkflowHandlersBuilder {
            table: HandlerTable {
                run: Some(Box::new(run)),
                ..Default::default()
            },
        }
    }
}

pub struct WorkflowHandlersBuilder {
    table: HandlerTable,
}

impl std::fmt::Debug for WorkflowHandlersBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandlersBuilder")
            .finish_non_exhaustive()
    }
}

impl WorkflowHandlersBuilder {
    pub fn signal(
        mut self,
        name: impl Into<String>,
        handler: impl FnMut(WfContext, SignalInput) -> HandlerFuture<Result<(), Failure>>
        + Send
        + 'static,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        if self.table.signals.contains_key(&name) {
            return Err(RegistryError::DuplicateHandler {
                kind: "signal",
                name,
            });
        }
        self.table.signals.insert(name, Box::new(handler));
        Ok(self)
    }

    /// Fallback invoked for signals with no exact-name handler.
    pub fn dynamic_signal(
        mut self,
        handler: impl FnMut(WfContext, SignalInput) -> HandlerFuture<Result<(), Failure>>
        + Send
        + 'static,
    ) -> Result<Self, RegistryError> {
        if self.table.dynamic_signal.is_some() {
            return Err(RegistryError::DuplicateDynamicHandler { kind: "signal" });
        }
        self.table.dynamic_signal = Some(Box::new(handler));
        Ok(self)
    }

    pub fn query(
        mut self,
        name: impl Into<String>,
        handler: impl FnMut(QueryInput) -> Result<Payload, Failure> + Send + 'static,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        if self.table.queries.contains_key(&name) {
            return Err(RegistryError::DuplicateHandler {
                kind: "query",
                name,
            });
        }
        self.table.queries.insert(name, Box::new(handler));
        Ok(self)
    }

    /// Fallback invoked for queries with no exact-name handler.
    pub fn dynamic_query(
        mut self,
        handler: impl FnMut(QueryInput) -> Result<Payload, Failure> + Send + 'static,
    ) -> Result<Self, RegistryError> {
        if self.table.dynamic_query.is_some() {
            return Err(RegistryError::DuplicateDynamicHandler { kind: "query" });
        }
        self.table.dynamic_query = Some(Box::new(handler));
        Ok(self)
    }

    pub fn update(
        mut self,
        name: impl Into<String>,
        validator: Option<ValidatorFn>,
        handler: impl FnMut(WfContext, UpdateInput) -> HandlerFuture<Result<Payload, Failure>>
        + Send
        + 'static,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        if self.table.updates.contains_key(&name) {
            return Err(RegistryError::DuplicateHandler {
                kind: "update",
                name,
            });
        }
        self.table.updates.insert(
            name,
            UpdateHandler {
                validator,
                handler: Box::new(handler),
            },
        );
        Ok(self)
    }

    pub fn build(self) -> WorkflowHandlers {
        WorkflowHandlers { table: self.table }
    }
}

/// Builds one run's handler set. Called once per instance construction,
/// including reconstruction-by-replay after eviction.
pub type WorkflowFactory = Box<dyn Fn() -> WorkflowHandlers + Send + Sync>;

/// Worker-wide lookup: workflow type name to handler factory.
#[derive(Default)]
pub struct WorkflowRegistry {
    factories: HashMap<String, WorkflowFactory>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        workflow_type: impl Into<String>,
        factory: impl Fn() -> WorkflowHandlers + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        let name = workflow_type.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::DuplicateWorkflowType { name });
        }
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    /// Build a fresh handler set for the named type.
    pub fn instantiate(&self, workflow_type: &str) -> Result<WorkflowHandlers, RegistryError> {
        self.factories
            .get(workflow_type)
            .map(|factory| factory())
            .ok_or_else(|| RegistryError::UnknownWorkflowType {
                name: workflow_type.to_string(),
            })
    }

    pub fn contains(&self, workflow_type: &str) -> bool {
        self.factories.contains_key(workflow_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_run() -> WorkflowHandlersBuilder {
        WorkflowHandlers::builder(|_ctx, _input| {
            Box::pin(async { Ok(WfExitValue::Normal(Payload::new(vec![]))) })
        })
    }

    #[test]
    fn duplicate_signal_name_is_rejected() {
        let err = noop_run()
            .signal("bump", |_ctx, _sig| Box::pin(async { Ok(()) }))
            .unwrap()
            .signal("bump", |_ctx, _sig| Box::pin(async { Ok(()) }))
            .unwrap_err();

        assert!(matches!(
            err,
            RegistryError::DuplicateHandler { kind: "signal", .. }
        ));
    }

    #[test]
    fn second_dynamic_query_is_rejected() {
        let err = noop_run()
            .dynamic_query(|_q| Ok(Payload::new(vec![])))
            .unwrap()
            .dynamic_query(|_q| Ok(Payload::new(vec![])))
            .unwrap_err();

        assert!(matches!(
            err,
            RegistryError::DuplicateDynamicHandler { kind: "query" }
        ));
    }

    #[test]
    fn registry_rejects_duplicate_workflow_types() {
        let mut registry = WorkflowRegistry::new();
        registry
            .register("order", || noop_run().build())
            .unwrap();

        let err = registry.register("order", || noop_run().build()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateWorkflowType { .. }));
    }

    #[test]
    fn unknown_type_reports_error() {
        let registry = WorkflowRegistry::new();
        let err = registry.instantiate("ghost").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownWorkflowType { .. }));
    }
}
