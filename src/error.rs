use thiserror::Error;

/// Error taxonomy for the engine's control-path API.
///
/// Every public, fallible call returns one of these kinds rather than a
/// free-form string. Nothing on the RT path ever produces one of these —
/// RT-side failures are folded into dropout/metrics counters instead (see
/// `metrics`).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("audio backend error: {0}")]
    Backend(String),

    #[error("decoding error on source {source_id}: {message}")]
    Decoding { source_id: String, message: String },

    #[error("seek error: {0}")]
    Seek(String),

    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("invalid state for this operation: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Configuration(err.to_string())
    }
}
