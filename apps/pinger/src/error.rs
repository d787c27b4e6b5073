use thiserror::Error;

/// Validation and lifecycle failures surfaced to the caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("a target with url {0} already exists")]
    DuplicateTarget(String),
    #[error("no target registered for url {0}")]
    NotFound(String),
    #[error("a probe task is already running for url {0}")]
    AlreadyScheduled(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
