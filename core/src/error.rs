use std::path::PathBuf;

use thiserror::Error;

/// Guest harness error types
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The guest test program could not be compiled
    #[error("Guest build failed: {0}")]
    GuestBuild(String),

    /// The executable exists but could not be inspected
    #[error("ELF inspection failed for {path}: {message}")]
    ElfParse { path: PathBuf, message: String },

    /// The PT_INTERP segment points past the end of the file
    #[error("Interpreter segment truncated in {path}: declared {declared} bytes, {available} available")]
    InterpreterTruncated {
        path: PathBuf,
        declared: u64,
        available: u64,
    },

    /// The dynamic-dependency listing tool failed
    #[error("Dependency tool {tool} failed: {message}")]
    DependencyTool { tool: String, message: String },

    /// Boot archive could not be written or read
    #[error("Archive error: {0}")]
    Archive(String),

    /// Two distinct libraries would land on the same archive path
    #[error("Library collision on {name}: {first} and {second}")]
    LibraryCollision {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Channel setup failed
    #[error("Channel error: {0}")]
    Channel(String),

    /// A length prefix promised more bytes than the peer delivered
    #[error("Frame truncated: expected {expected} bytes, received {received}")]
    FrameTruncated { expected: usize, received: usize },

    /// The control channel was closed or delivered an unterminated message
    #[error("Control channel closed: {0}")]
    ControlClosed(String),

    /// A relay read did not complete within the configured deadline
    #[error("Relay timeout on {channel} channel after {secs}s")]
    RelayTimeout { channel: String, secs: u64 },

    /// Emulator failed to start or run
    #[error("Emulator failed: {message}")]
    EmulatorError {
        message: String,
        hint: Option<String>,
    },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for HarnessError {
    fn from(err: serde_yaml::Error) -> Self {
        HarnessError::SerializationError(err.to_string())
    }
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;
