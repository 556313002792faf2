//! Error types for binlog inspection
//!
//! One error enum for the whole crate, with a coarse category used by the
//! binary to pick its process exit code. Fatal-stream errors terminate the
//! owning source; row-local problems are logged where they happen and never
//! surface as `BinlensError`.

use thiserror::Error;

/// Error categories, each with a stable exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid, conflicting or out-of-range options
    Configuration,
    /// File open/read/write/remove failures
    File,
    /// Bad magic, truncated or corrupt frames, undecodable events
    LogFormat,
    /// Network/session failures against the database
    Connection,
    /// Catalog query failures
    Query,
    /// JSON snapshot encode/decode failures
    Serialization,
    /// Everything else
    Other,
}

impl ErrorCategory {
    /// Process exit code for this category.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCategory::Configuration => 11,
            ErrorCategory::File => 18,
            ErrorCategory::LogFormat => 23,
            ErrorCategory::Connection => 52,
            ErrorCategory::Query => 53,
            ErrorCategory::Serialization => 35,
            ErrorCategory::Other => 99,
        }
    }
}

/// Errors produced while inspecting a binlog stream.
#[derive(Error, Debug)]
pub enum BinlensError {
    /// File does not begin with the binlog magic
    #[error("{0} is not a binlog file")]
    NotALogFile(String),

    /// A frame could not be fully read
    #[error("truncated event in {segment} at offset {offset}")]
    Truncated { segment: String, offset: u64 },

    /// A frame was read but its content contradicts the header
    #[error("corrupt event in {segment}: {detail}")]
    Corrupt { segment: String, detail: String },

    /// Event payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Replication protocol violation
    #[error("replication protocol error: {0}")]
    Protocol(String),

    /// Connection-level failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Schema/table definition problem
    #[error("schema error: {0}")]
    Schema(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Catalog query failure
    #[error("catalog query error: {0}")]
    Query(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl BinlensError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Category for exit-code selection.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotALogFile(_)
            | Self::Truncated { .. }
            | Self::Corrupt { .. }
            | Self::Decode(_) => ErrorCategory::LogFormat,
            Self::Protocol(_) | Self::Connection(_) => ErrorCategory::Connection,
            Self::Schema(_) | Self::Query(_) => ErrorCategory::Query,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Io(_) => ErrorCategory::File,
            Self::Json(_) => ErrorCategory::Serialization,
            Self::Other(_) => ErrorCategory::Other,
        }
    }
}

/// Result type for binlens operations
pub type Result<T> = std::result::Result<T, BinlensError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BinlensError::NotALogFile("mysql-bin.000001".into());
        assert!(err.to_string().contains("not a binlog file"));
        let err = BinlensError::Truncated {
            segment: "mysql-bin.000001".into(),
            offset: 120,
        };
        assert!(err.to_string().contains("offset 120"));
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            BinlensError::config("x").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            BinlensError::decode("x").category(),
            ErrorCategory::LogFormat
        );
        assert_eq!(
            BinlensError::connection("x").category(),
            ErrorCategory::Connection
        );
        assert_eq!(BinlensError::query("x").category(), ErrorCategory::Query);
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            ErrorCategory::Configuration,
            ErrorCategory::File,
            ErrorCategory::LogFormat,
            ErrorCategory::Connection,
            ErrorCategory::Query,
            ErrorCategory::Serialization,
            ErrorCategory::Other,
        ]
        .iter()
        .map(|c| c.exit_code())
        .collect::<std::collections::HashSet<_>>();
        assert_eq!(codes.len(), 7);
    }
}
