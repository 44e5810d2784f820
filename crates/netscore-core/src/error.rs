use netscore_common::models::{EndpointId, NetworkType};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ScoreError {
    /// The caller lacks the privilege an operation requires.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// A registered score cache failed while receiving a broadcast.
    #[error("score cache {cache} ({network_type}) unreachable: {source}")]
    ListenerUnreachable {
        cache: String,
        network_type: NetworkType,
        #[source]
        source: anyhow::Error,
    },
    /// The bind request to a recommendation service could not be issued.
    #[error("bind to {endpoint} failed: {source}")]
    BindFailed {
        endpoint: EndpointId,
        #[source]
        source: anyhow::Error,
    },
    #[error("{0} is not supported")]
    UnsupportedOperation(&'static str),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = ScoreError> = std::result::Result<T, E>;
