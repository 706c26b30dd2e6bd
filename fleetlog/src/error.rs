//! Error types for fleetlog.
//!
//! Every fallible operation in the library returns [`Result`], whose error side is
//! [`FleetError`]. Per-item problems (a malformed filename, an unparseable log
//! line) are normally handled where they occur by counting and skipping; the
//! variants here are the ones that escape to a caller.

use thiserror::Error;

/// The main error type for fleetlog.
#[derive(Error, Debug)]
pub enum FleetError {
    /// A key or value did not match the schema it was decoded with.
    #[error("Malformed key {key}: {message}")]
    MalformedKey {
        /// What went wrong while decoding
        message: String,
        /// Hex rendering of the offending bytes
        key: String,
    },

    /// A sorted-run writer received a key smaller than its predecessor.
    #[error("Out-of-order write to '{store}': {current} follows {previous}")]
    OutOfOrderWrite {
        store: String,
        previous: String,
        current: String,
    },

    /// A grouping transform observed a key smaller than its predecessor.
    #[error("Unsorted input: {current} follows {previous}")]
    UnsortedInput { previous: String, current: String },

    /// A record store could not be opened, read, or committed.
    #[error("Store '{store}' error: {message}")]
    Storage {
        store: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A sorted-run file is structurally invalid.
    #[error("Corrupt run file {path}: {message}")]
    CorruptRun { path: String, message: String },

    /// A checksum stored in a run file does not match its contents.
    #[error("Checksum mismatch in {path}: expected {expected:#010x}, found {actual:#010x}")]
    ChecksumMismatch {
        path: String,
        expected: u32,
        actual: u32,
    },

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An invalid glob pattern.
    #[error("Glob error: {0}")]
    Glob(String),

    /// Error when parsing text such as a filename or a log line.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An output sink (CSV, sqlite, JSON artifact) failed.
    #[error("Sink '{sink}' error: {message}")]
    Sink { sink: String, message: String },

    /// The other end of a stage channel went away.
    #[error("Stage channel closed")]
    ChannelClosed,

    /// A pipeline stage failed; nothing it wrote was committed.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<FleetError>,
    },

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, FleetError>`.
///
/// ```rust
/// use fleetlog::error::Result;
///
/// fn parse_node(name: &str) -> Result<String> {
///     Ok(name.to_string())
/// }
/// # assert!(parse_node("OW0123456789AB").is_ok());
/// ```
pub type Result<T> = std::result::Result<T, FleetError>;

impl FleetError {
    /// Creates a malformed-key error, rendering the bytes as hex.
    pub fn malformed_key(key: &[u8], message: impl Into<String>) -> Self {
        Self::MalformedKey {
            message: message.into(),
            key: hex::encode(key),
        }
    }

    /// Creates an out-of-order error for the named store.
    pub fn out_of_order(store: impl Into<String>, previous: &[u8], current: &[u8]) -> Self {
        Self::OutOfOrderWrite {
            store: store.into(),
            previous: hex::encode(previous),
            current: hex::encode(current),
        }
    }

    /// Creates an unsorted-input error.
    pub fn unsorted(previous: &[u8], current: &[u8]) -> Self {
        Self::UnsortedInput {
            previous: hex::encode(previous),
            current: hex::encode(current),
        }
    }

    /// Creates a new storage error.
    pub fn storage(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            store: store.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source error.
    pub fn storage_with_source(
        store: impl Into<String>,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Storage {
            store: store.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a corrupt-run error.
    pub fn corrupt_run(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptRun {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new sink error.
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Wraps an error with the name of the stage it came from.
    pub fn stage_failed(stage: impl Into<String>, source: FleetError) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Returns true for errors caused by a peer task hanging up.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed)
    }
}

impl From<glob::PatternError> for FleetError {
    fn from(err: glob::PatternError) -> Self {
        Self::Glob(err.to_string())
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<chrono::ParseError> for FleetError {
    fn from(err: chrono::ParseError) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for FleetError {
    fn from(err: rusqlite::Error) -> Self {
        Self::sink("sqlite", err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<FleetError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| {
            let base_error = e.into();
            match base_error {
                FleetError::Internal(inner) => FleetError::Internal(format!("{msg}: {inner}")),
                other => FleetError::Internal(format!("{msg}: {other}")),
            }
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let msg = f();
            let base_error = e.into();
            match base_error {
                FleetError::Internal(inner) => FleetError::Internal(format!("{msg}: {inner}")),
                other => FleetError::Internal(format!("{msg}: {other}")),
            }
        })
    }
}
