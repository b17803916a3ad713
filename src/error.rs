//! Error types for the promotion workflow.
//!
//! No `anyhow` leakage. Explicit, typed errors.

/// Remote error code the promotion endpoint returns while source-control
/// events are still being synchronized.
pub const CONFLICT_ERROR_CODE: &str = "ERROR_HTTP_409";

#[derive(Debug, thiserror::Error)]
pub enum PromoteError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("no recent job found in the local cache; pass a job id instead")]
    NoRecentJob,

    #[error("cache key not found: {0}")]
    CacheKeyNotFound(String),

    #[error("job {job_id} cannot be resumed because its status is {status}")]
    JobNotResumable { job_id: String, status: String },

    #[error("request failed: status={status}, code={code}, message={message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("client timed out waiting for job {job_id}")]
    ClientTimeout { job_id: String },

    #[error(
        "stopped waiting for job {job_id}; it is still running. \
         Check its status with `devops-promote report --job-id {job_id}` \
         or keep watching with `devops-promote resume --job-id {job_id}`"
    )]
    WatchTimedOut { job_id: String },

    #[error("event stream failed: {0}")]
    Stream(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid workflow state: {0}")]
    InvalidState(String),
}

impl PromoteError {
    /// Stable machine-readable code. `Api` errors keep the remote code.
    pub fn code(&self) -> &str {
        match self {
            PromoteError::Validation(_) => "ValidationError",
            PromoteError::NotFound { .. } => "NotFoundError",
            PromoteError::InvalidJobId(_) => "InvalidJobIdError",
            PromoteError::NoRecentJob => "NoRecentJobError",
            PromoteError::CacheKeyNotFound(_) => "CacheKeyNotFoundError",
            PromoteError::JobNotResumable { .. } => "JobNotResumableError",
            PromoteError::Api { code, .. } => code,
            PromoteError::ClientTimeout { .. } => "ClientTimeoutError",
            PromoteError::WatchTimedOut { .. } => "ClientTimeoutError",
            PromoteError::Stream(_) => "StreamError",
            PromoteError::Query(_) => "QueryError",
            PromoteError::Storage(_) => "StorageError",
            PromoteError::Config(_) => "ConfigError",
            PromoteError::InvalidState(_) => "InvalidStateError",
        }
    }

    /// Whether the remote reported a source-control synchronization conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PromoteError::Api { code, .. } if code == CONFLICT_ERROR_CODE)
    }

    /// Whether this error might go away if the caller tries again later.
    pub fn is_recoverable(&self) -> bool {
        self.is_conflict()
            || matches!(
                self,
                PromoteError::ClientTimeout { .. }
                    | PromoteError::WatchTimedOut { .. }
                    | PromoteError::Stream(_)
            )
    }
}
