//! Error Taxonomy
//!
//! One error type for every fallible operation in the crate. Variants carry
//! the key and the cas values involved so callers can log or branch without
//! re-reading state.

use std::io::Error as IoError;
use std::time::Duration;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure category, for callers that only need to branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    DocumentAlreadyExists,
    CasMismatch,
    Locked,
    NotNumeric,
    CounterOverflow,
    DurabilityTimeout,
    ConcurrentModification,
    InvalidArgument,
    Timeout,
    ViewNotFound,
    BucketClosed,
    BucketNotFound,
    Authentication,
    ClusterDisconnected,
    Config,
    Io,
}

#[derive(Debug)]
pub enum Error {
    /// Key is absent or expired
    NotFound { key: String },
    /// Insert hit a live document
    DocumentAlreadyExists { key: String },
    /// Supplied cas does not match the stored (or lock) cas
    CasMismatch {
        key: String,
        requested: u64,
        observed: u64,
    },
    /// Key is held by an unexpired lock
    Locked { key: String },
    /// Counter target does not hold a decimal integer
    NotNumeric { key: String },
    /// Counter arithmetic left the i64 range
    CounterOverflow { key: String, current: i64, delta: i64 },
    /// Mutation committed but the requested acknowledgements never arrived
    DurabilityTimeout {
        key: String,
        cas: u64,
        persist_to: u8,
        replicate_to: u8,
        persisted: usize,
        replicated: usize,
    },
    /// A newer mutation replaced the one being observed
    ConcurrentModification {
        key: String,
        expected: u64,
        observed: u64,
    },
    /// Bad option name, option value or key
    InvalidArgument(String),
    /// Operation deadline elapsed
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    ViewNotFound { design: String, view: String },
    /// Handle was closed before the operation was issued
    BucketClosed { bucket: String },
    BucketNotFound(String),
    Authentication { bucket: String },
    ClusterDisconnected,
    Config(String),
    Io(IoError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::DocumentAlreadyExists { .. } => ErrorKind::DocumentAlreadyExists,
            Error::CasMismatch { .. } => ErrorKind::CasMismatch,
            Error::Locked { .. } => ErrorKind::Locked,
            Error::NotNumeric { .. } => ErrorKind::NotNumeric,
            Error::CounterOverflow { .. } => ErrorKind::CounterOverflow,
            Error::DurabilityTimeout { .. } => ErrorKind::DurabilityTimeout,
            Error::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::ViewNotFound { .. } => ErrorKind::ViewNotFound,
            Error::BucketClosed { .. } => ErrorKind::BucketClosed,
            Error::BucketNotFound(_) => ErrorKind::BucketNotFound,
            Error::Authentication { .. } => ErrorKind::Authentication,
            Error::ClusterDisconnected => ErrorKind::ClusterDisconnected,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Transient failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Locked { .. } | Error::Timeout { .. } | Error::DurabilityTimeout { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound { key } => write!(f, "Document not found: {}", key),
            Error::DocumentAlreadyExists { key } => write!(f, "Document already exists: {}", key),
            Error::CasMismatch {
                key,
                requested,
                observed,
            } => write!(
                f,
                "CAS mismatch on {}: requested {}, observed {}",
                key, requested, observed
            ),
            Error::Locked { key } => write!(f, "Document is locked: {}", key),
            Error::NotNumeric { key } => write!(f, "Document is not a counter: {}", key),
            Error::CounterOverflow {
                key,
                current,
                delta,
            } => write!(
                f,
                "Counter overflow on {}: {} + {} is out of range",
                key, current, delta
            ),
            Error::DurabilityTimeout {
                key,
                cas,
                persist_to,
                replicate_to,
                persisted,
                replicated,
            } => write!(
                f,
                "Durability timeout on {} (cas {}): persisted {}/{}, replicated {}/{}",
                key, cas, persisted, persist_to, replicated, replicate_to
            ),
            Error::ConcurrentModification {
                key,
                expected,
                observed,
            } => write!(
                f,
                "Concurrent modification on {}: awaited cas {}, node holds {}",
                key, expected, observed
            ),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Timeout { operation, after } => {
                write!(f, "{} timed out after {:?}", operation, after)
            }
            Error::ViewNotFound { design, view } => {
                write!(f, "View not found: _design/{}/_view/{}", design, view)
            }
            Error::BucketClosed { bucket } => write!(f, "Bucket is closed: {}", bucket),
            Error::BucketNotFound(name) => write!(f, "Bucket not found: {}", name),
            Error::Authentication { bucket } => {
                write!(f, "Authentication failed for bucket: {}", bucket)
            }
            Error::ClusterDisconnected => write!(f, "Cluster is disconnected"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}
