use thiserror::Error;

/// Errors surfaced by the worker pool.
///
/// Nothing is retried internally — every failure propagates to the immediate
/// caller with whatever detail the underlying collaborator attached.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid argument `{param}`: expected {expected}")]
    InvalidArgument {
        param: &'static str,
        expected: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker pool is terminated")]
    Terminated,

    #[error("termination error: {0}")]
    Termination(String),
}
