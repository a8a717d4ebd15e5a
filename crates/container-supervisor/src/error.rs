//! Error taxonomy for container lifecycle management and invocation.

use thiserror::Error;

/// Result alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors surfaced while preparing, invoking, or tearing down containers.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The Docker daemon is unreachable.
    #[error("docker unavailable: {0}")]
    DockerUnavailable(String),

    /// A Docker API call failed (pull, create, start, stop, remove, inspect).
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// A declared resource limit (`memory_limit`, `cpu_limit`) could not be parsed.
    #[error("invalid resource limit: {0}")]
    InvalidResourceLimit(String),

    /// The container has no known `(host, port)` to invoke — `prepare()` was never called, or
    /// failed, for this container id.
    #[error("container {0} has no known address; call prepare() first")]
    NotPrepared(String),

    /// The HTTP connection to the container was refused after exhausting `connect_retries`.
    #[error("connection refused after {attempts} attempts: {source}")]
    ConnectionRefused {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// The underlying transport error.
        source: reqwest::Error,
    },

    /// The container did not respond within `timeout`.
    #[error("invocation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The container responded with a non-success HTTP status. Not retried.
    #[error("container returned HTTP {status}: {body}")]
    HttpStatus {
        /// The response status code.
        status: u16,
        /// The response body, for diagnostics.
        body: String,
    },

    /// The response body could not be interpreted as output.
    #[error("malformed container response: {0}")]
    MalformedResponse(String),
}

impl SupervisorError {
    /// Whether this error represents a connection-refused condition eligible for linear retry
    /// (spec §4.3: "Connection refused triggers linear retries").
    #[must_use]
    pub const fn is_connection_refused(&self) -> bool {
        matches!(self, Self::ConnectionRefused { .. })
    }
}
