use crate::config::ConfigError;
use crate::transport::TransportError;
use resolute_machine::RegistryError;

/// Errors fatal to the worker loop. Workflow task failures never surface
/// here; they are reported to the server inside completions and retried.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("registration error: {0}")]
    Registry(#[from] RegistryError),
    #[error("fatal worker error: {0}")]
    Fatal(String),
}
