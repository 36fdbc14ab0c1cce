use thiserror::Error;

/// Protocol-level error types.
///
/// Distinguishes malformed client input, which the service answers
/// with an error response, from transport failures, which end the
/// connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A request line exceeded the codec's length limit.
    #[error("request line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// The line was not valid JSON for any known command.
    #[error("bad request: {0}")]
    Json(#[from] serde_json::Error),

    /// The underlying socket failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the client sent something unintelligible, as opposed to
    /// the connection itself failing.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::LineTooLong { .. } | Self::Json(_))
    }
}

/// Specialized result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
