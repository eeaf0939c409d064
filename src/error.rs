//! tiercomm error types

/// tiercomm result type
pub type Result<T> = std::result::Result<T, Error>;

/// tiercomm errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Payload is neither an array nor a sequence of arrays
    #[error("invalid payload kind: {reason}")]
    InvalidPayloadKind {
        /// What was found instead
        reason: String,
    },

    /// Device collectives were requested but the backend cannot be used
    #[error("device collectives unavailable: {reason}")]
    DeviceCollectiveUnavailable {
        /// Why the backend is unusable
        reason: String,
    },

    /// Failure of the underlying header or bulk channel
    #[error("transport error: {reason}")]
    Transport {
        /// Description of what went wrong
        reason: String,
    },

    /// The peer sent something that disagrees with the declared message layout
    #[error("contract violation: {reason}")]
    ContractViolation {
        /// Description of the mismatch
        reason: String,
    },

    /// Operation must be provided by a concrete communication strategy
    #[error("{operation} is not implemented by this communicator")]
    NotImplemented {
        /// Name of the missing operation
        operation: &'static str,
    },

    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Header or object (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error from numr operations
    #[cfg(feature = "numr")]
    #[error("numr error: {0}")]
    Numr(#[from] numr::error::Error),
}

impl Error {
    pub(crate) fn transport(reason: impl Into<String>) -> Self {
        Error::Transport {
            reason: reason.into(),
        }
    }

    pub(crate) fn contract(reason: impl Into<String>) -> Self {
        Error::ContractViolation {
            reason: reason.into(),
        }
    }
}
