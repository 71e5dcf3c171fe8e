//! Worker configuration.

use resolute_types::{JsonPayloadConverter, PayloadConverter};
use std::sync::Arc;
use std::time::Duration;

/// Build-id based versioning directive for the whole worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VersioningBehavior {
    #[default]
    Unspecified,
    Pinned,
    AutoUpgrade,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("{field} must be greater than zero")]
    ZeroLimit { field: &'static str },
}

/// Recognized worker options. Construct through [`WorkerConfig::builder`],
/// which validates at build time.
#[derive(Clone)]
pub struct WorkerConfig {
    pub namespace: String,
    pub task_queue: String,
    /// Reported to the server on every poll; defaults to a generated
    /// per-process identity.
    pub identity: String,
    pub build_id: Option<String>,
    /// Bound on the LRU instance cache.
    pub max_cached_workflows: usize,
    pub max_outstanding_workflow_tasks: usize,
    pub max_outstanding_activities: usize,
    pub max_workflow_pollers: usize,
    pub max_activity_pollers: usize,
    /// Forwarded to the transport when it registers the sticky queue.
    pub sticky_queue_schedule_to_start_timeout: Duration,
    /// How long shutdown finalization waits for in-flight work.
    pub graceful_shutdown_period: Duration,
    pub data_converter: Arc<dyn PayloadConverter>,
    pub versioning_behavior: VersioningBehavior,
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("namespace", &self.namespace)
            .field("task_queue", &self.task_queue)
            .field("identity", &self.identity)
            .field("build_id", &self.build_id)
            .field("max_cached_workflows", &self.max_cached_workflows)
            .field(
                "max_outstanding_workflow_tasks",
                &self.max_outstanding_workflow_tasks,
            )
            .field(
                "max_outstanding_activities",
                &self.max_outstanding_activities,
            )
            .field("max_workflow_pollers", &self.max_workflow_pollers)
            .field("max_activity_pollers", &self.max_activity_pollers)
            .field(
                "sticky_queue_schedule_to_start_timeout",
                &self.sticky_queue_schedule_to_start_timeout,
            )
            .field(
                "graceful_shutdown_period",
                &self.graceful_shutdown_period,
            )
            .field("data_converter", &"<dyn PayloadConverter>")
            .field("versioning_behavior", &self.versioning_behavior)
            .finish()
    }
}

impl WorkerConfig {
    pub fn builder(
        namespace: impl Into<String>,
        task_queue: impl Into<String>,
    ) -> WorkerConfigBuilder {
        WorkerConfigBuilder {
            namespace: namespace.into(),
            task_queue: task_queue.into(),
            identity: None,
            build_id: None,
            max_cached_workflows: 1000,
            max_outstanding_workflow_tasks: 100,
            max_outstanding_activities: 100,
            max_workflow_pollers: 5,
            max_activity_pollers: 5,
            sticky_queue_schedule_to_start_timeout: Duration::from_secs(10),
            graceful_shutdown_period: Duration::from_secs(30),
            data_converter: Arc::new(JsonPayloadConverter),
            versioning_behavior: VersioningBehavior::Unspecified,
        }
    }
}

pub struct WorkerConfigBuilder {
    namespace: String,
    task_queue: String,
    identity: Option<String>,
    build_id: Option<String>,
    max_cached_workflows: usize,
    max_outstanding_workflow_tasks: usize,
    max_outstanding_activities: usize,
    max_workflow_pollers: usize,
    max_activity_pollers: usize,
    sticky_queue_schedule_to_start_timeout: Duration,
    graceful_shutdown_period: Duration,
    data_converter: Arc<dyn PayloadConverter>,
    versioning_behavior: VersioningBehavior,
}

impl WorkerConfigBuilder {
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = Some(build_id.into());
        self
    }

    pub fn max_cached_workflows(mut self, limit: usize) -> Self {
        self.max_cached_workflows = limit;
        self
    }

    pub fn max_outstanding_workflow_tasks(mut self, limit: usize) -> Self {
        self.max_outstanding_workflow_tasks = limit;
        self
    }

    pub fn max_outstanding_activities(mut self, limit: usize) -> Self {
        self.max_outstanding_activities = limit;
        self
    }

    pub fn max_workflow_pollers(mut self, limit: usize) -> Self {
        self.max_workflow_pollers = limit;
        self
    }

    pub fn max_activity_pollers(mut self, limit: usize) -> Self {
        self.max_activity_pollers = limit;
        self
    }

    pub fn sticky_queue_schedule_to_start_timeout(mut self, timeout: Duration) -> Self {
        self.sticky_queue_schedule_to_start_timeout = timeout;
        self
    }

    pub fn graceful_shutdown_period(mut self, period: Duration) -> Self {
        self.graceful_shutdown_period = period;
        self
    }

    pub fn data_converter(mut self, converter: Arc<dyn PayloadConverter>) -> Self {
        self.data_converter = converter;
        self
    }

    pub fn versioning_behavior(mut self, behavior: VersioningBehavior) -> Self {
        self.versioning_behavior = behavior;
        self
    }

    pub fn build(self) -> Result<WorkerConfig, ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::EmptyField { field: "namespace" });
        }
        if self.task_queue.is_empty() {
            return Err(ConfigError::EmptyField { field: "task_queue" });
        }
        for (field, value) in [
            ("max_cached_workflows", self.max_cached_workflows),
            (
                "max_outstanding_workflow_tasks",
                self.max_outstanding_workflow_tasks,
            ),
            ("max_outstanding_activities", self.max_outstanding_activities),
            ("max_workflow_pollers", self.max_workflow_pollers),
            ("max_activity_pollers", self.max_activity_pollers),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit { field });
            }
        }

        Ok(WorkerConfig {
            namespace: self.namespace,
            task_queue: self.task_queue,
            identity: self
                .identity
                .unwrap_or_else(|| format!("resolute-worker-{}", uuid::Uuid::new_v4())),
            build_id: self.build_id,
            max_cached_workflows: self.max_cached_workflows,
            max_outstanding_workflow_tasks: self.max_outstanding_workflow_tasks,
            max_outstanding_activities: self.max_outstanding_activities,
            max_workflow_pollers: self.max_workflow_pollers,
            max_activity_pollers: self.max_activity_pollers,
            sticky_queue_schedule_to_start_timeout: self.sticky_queue_schedule_to_start_timeout,
            graceful_shutdown_period: self.graceful_shutdown_period,
            data_converter: self.data_converter,
            versioning_behavior: self.versioning_behavior,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let config = WorkerConfig::builder("default", "orders").build().unwrap();
        assert_eq!(config.max_cached_workflows, 1000);
        assert!(config.identity.starts_with("resolute-worker-"));
        assert_eq!(config.versioning_behavior, VersioningBehavior::Unspecified);
    }

    #[test]
    fn empty_task_queue_is_rejected() {
        let err = WorkerConfig::builder("default", "").build().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EmptyField { field: "task_queue" }
        ));
    }

    #[test]
    fn zero_slot_limits_are_rejected() {
        let err = WorkerConfig::builder("default", "orders")
            .max_outstanding_workflow_tasks(0)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ZeroLimit {
                field: "max_outstanding_workflow_tasks"
            }
        ));
    }
}
