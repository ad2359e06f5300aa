//! Error types for the agent.
//!
//! Defines custom error types with classification for retry behavior.
//! Transport and decode failures are handled at the consumer boundary;
//! reconciliation failures are turned into status messages inside the
//! handlers (see `reconcile`).

use thiserror::Error;

/// Error type for agent operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Broker transport error (connect, publish, consume)
    #[error("broker transport error: {0}")]
    Transport(String),

    /// Message body could not be decoded into the envelope union
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Missing required configuration
    #[error("missing configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure to decode a raw broker payload into an [`Envelope`](crate::message::Envelope).
///
/// Decode errors are terminal for the message: the consumer logs them and
/// acks, since redelivering an unparseable payload cannot succeed.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Body was not valid UTF-8
    #[error("message body is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),

    /// Body was not valid JSON, or the discriminator was missing/unknown
    #[error("message body is not a known envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

impl From<lapin::Error> for Error {
    fn from(e: lapin::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl Error {
    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Transport(_) => true,
            Error::Decode(_) | Error::Config(_) | Error::Serialization(_) => false,
        }
    }
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, Error>;
