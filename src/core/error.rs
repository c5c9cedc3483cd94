//! Error types for card and session operations

use thiserror::Error;

/// Coarse error category, for callers that only need to branch on the kind
/// of failure (user messaging, retry decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Address,
    Capacity,
    Decode,
    Auth,
    WriteProtected,
    Transport,
    Timeout,
    Probe,
    Io,
    Config,
}

/// Card operation errors
#[derive(Error, Debug)]
pub enum CardError {
    /// Block out of range or not usable for the request
    #[error("Invalid block address {block}: {reason}")]
    Address { block: u32, reason: String },

    /// Payload longer than the space left from the start block
    #[error("Payload of {requested} bytes exceeds capacity of {available} bytes from block {start_block}")]
    Capacity {
        requested: usize,
        available: usize,
        start_block: u32,
    },

    /// Stored header or payload does not read back as a string
    #[error("Corrupt string at block {start_block}: {reason}")]
    Decode { start_block: u32, reason: String },

    /// Sector key rejected
    #[error("Authentication failed for block {block}: {reason}")]
    Auth { block: u32, reason: String },

    /// Medium refused the write
    #[error("Block {block} is write-protected")]
    WriteProtected { block: u32 },

    /// Link to the reader or medium failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transport I/O or the operation deadline expired
    #[error("Operation timed out after {elapsed_ms}ms (budget {budget_ms}ms)")]
    Timeout { elapsed_ms: u64, budget_ms: u64 },

    /// No medium answered, or its type could not be determined
    #[error("Probe failed: {0}")]
    Probe(String),

    /// Filesystem error from a file-backed transport or config load
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration failed to parse or validate
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CardError {
    /// Create an address error
    pub fn address(block: u32, reason: impl Into<String>) -> Self {
        CardError::Address {
            block,
            reason: reason.into(),
        }
    }

    /// Create a decode error for the string at `start_block`
    pub fn decode(start_block: u32, reason: impl Into<String>) -> Self {
        CardError::Decode {
            start_block,
            reason: reason.into(),
        }
    }

    /// Coarse category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CardError::Address { .. } => ErrorKind::Address,
            CardError::Capacity { .. } => ErrorKind::Capacity,
            CardError::Decode { .. } => ErrorKind::Decode,
            CardError::Auth { .. } => ErrorKind::Auth,
            CardError::WriteProtected { .. } => ErrorKind::WriteProtected,
            CardError::Transport(_) => ErrorKind::Transport,
            CardError::Timeout { .. } => ErrorKind::Timeout,
            CardError::Probe(_) => ErrorKind::Probe,
            CardError::Io(_) => ErrorKind::Io,
            CardError::Config(_) => ErrorKind::Config,
        }
    }

    /// Only plain transport failures earn the session's recover-and-retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CardError::Transport(_))
    }
}

impl From<toml::de::Error> for CardError {
    fn from(err: toml::de::Error) -> Self {
        CardError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for CardError {
    fn from(err: validator::ValidationErrors) -> Self {
        CardError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(CardError::address(3, "trailer").kind(), ErrorKind::Address);
        assert_eq!(
            CardError::Capacity {
                requested: 10,
                available: 5,
                start_block: 4
            }
            .kind(),
            ErrorKind::Capacity
        );
        assert_eq!(
            CardError::Transport("link".into()).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            CardError::Timeout {
                elapsed_ms: 10,
                budget_ms: 5
            }
            .kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(CardError::Transport("reset".into()).is_retryable());
        assert!(!CardError::WriteProtected { block: 4 }.is_retryable());
        assert!(!CardError::Timeout {
            elapsed_ms: 1,
            budget_ms: 0
        }
        .is_retryable());
        assert!(!CardError::decode(4, "bad utf-8").is_retryable());
    }

    #[test]
    fn test_messages_carry_reason() {
        let err = CardError::address(7, "block is a sector trailer");
        assert_eq!(
            err.to_string(),
            "Invalid block address 7: block is a sector trailer"
        );
    }
}
