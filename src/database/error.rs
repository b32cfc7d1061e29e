use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Database error type
#[derive(Debug)]
pub enum Error {
    /// Connection could not be opened or was lost
    Connection(String),
    /// Statement did not complete within the request timeout
    Timeout(Duration),
    /// Query error
    Query(String),
    /// Transaction error
    Transaction(String),
    /// A secondary unique index rejected the write
    UniqueViolation(String),
    /// A row with the same primary key already exists
    DuplicateKey(String),
    /// Type mismatch error
    TypeMismatch {
        /// Column being decoded
        column: String,
        /// Expected Rust-side type
        expected: &'static str,
    },
    /// Column not found error
    ColumnNotFound(String),
    /// Configuration error
    Config(String),
}

impl Error {
    /// Whether the shard behind this connection should be treated as unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(msg) => write!(f, "Connection error: {}", msg),
            Error::Timeout(after) => write!(f, "Timed out after {}ms", after.as_millis()),
            Error::Query(msg) => write!(f, "Query error: {}", msg),
            Error::Transaction(msg) => write!(f, "Transaction error: {}", msg),
            Error::UniqueViolation(msg) => write!(f, "Unique constraint violated: {}", msg),
            Error::DuplicateKey(msg) => write!(f, "Duplicate primary key: {}", msg),
            Error::TypeMismatch { column, expected } => {
                write!(f, "Type mismatch on column {}: expected {}", column, expected)
            }
            Error::ColumnNotFound(col) => write!(f, "Column not found: {}", col),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl StdError for Error {}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, Error>;
