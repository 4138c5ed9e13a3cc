use thiserror::Error;

/// Failure to turn a binary frame into a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("{kind} frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("unknown client message type: {0}")]
    UnknownClientType(u8),
}

impl DecodeError {
    /// Whether the frame must end the connection it arrived on.
    ///
    /// A known discriminant with a truncated body means the peer is broken;
    /// anything else is skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::TooShort { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("no signing identity available")]
    Unavailable,
}

pub type DecodeResult<T> = Result<T, DecodeError>;
