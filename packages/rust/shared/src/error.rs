//! Error types for Scriptorium.
//!
//! Library crates use [`ScriptoriumError`] via `thiserror`. The four families
//! (format, network, verification, config) are separate enums so that batch
//! summaries can carry them per record or per module.
//! App crates (cli) wrap this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all Scriptorium operations.
#[derive(Debug, thiserror::Error)]
pub enum ScriptoriumError {
    /// Binary or markup format problem, scoped to one record or module.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Transfer failure while talking to a remote source.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Installed module failed an integrity check.
    #[error("verification error: {0}")]
    Verification(#[from] VerificationError),

    /// Configuration, descriptor, or registry lookup problem.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Verse address outside its versification's declared bounds.
    #[error("address out of range: {address} in {system}")]
    AddressOutOfRange { system: String, address: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// SQLite-backed module access error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Data validation error (bad JSON, invalid definition, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScriptoriumError>;

// ---------------------------------------------------------------------------
// Error families
// ---------------------------------------------------------------------------

/// Decoding failures. Fatal only to the record or module that raised them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),

    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("{0} is not present in this module")]
    AddressNotInModule(String),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Transfer failures, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl NetworkError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::ConnectionRefused(_) | Self::ConnectionReset(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::NotFound(_)
            | Self::AuthFailed(_)
            | Self::Protocol(_)
            | Self::DeadlineExceeded => false,
        }
    }
}

/// Integrity check failures. Always reported per module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationError {
    #[error("conf file missing: {path}")]
    MissingConf { path: String },

    #[error("data directory empty or missing: {path}")]
    EmptyDataDir { path: String },

    #[error("size mismatch: declared {expected} bytes, found {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Configuration and lookup failures. Module-level skip with a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed conf {file}: {reason}")]
    MalformedConf { file: String, reason: String },

    #[error("unknown versification: {0}")]
    UnknownVersification(String),

    #[error("versification {system} extends unknown parent {parent}")]
    UnknownParent { system: String, parent: String },

    #[error("duplicate source name: {0}")]
    DuplicateSource(String),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("source {0} has never been refreshed")]
    SourceNotRefreshed(String),

    #[error("module {module} is offered by several sources ({}); choose one", sources.join(", "))]
    AmbiguousModule {
        module: String,
        sources: Vec<String>,
    },

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("{0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Constructors and classification
// ---------------------------------------------------------------------------

impl ScriptoriumError {
    /// Create a generic config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// A malformed-input format error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(FormatError::Malformed(msg.into()))
    }

    /// A protocol-level network error that is not worth retrying.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(NetworkError::Protocol(msg.into()))
    }

    pub fn verification(error: VerificationError) -> Self {
        Self::Verification(error)
    }

    /// Shorthand for [`FormatError::CorruptIndex`].
    pub fn corrupt_index(msg: impl Into<String>) -> Self {
        Self::Format(FormatError::CorruptIndex(msg.into()))
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for network failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(e) if e.is_transient())
    }

    /// True for not-found class responses (HTTP 404/410, FTP 550).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Network(NetworkError::NotFound(_)))
    }
}
