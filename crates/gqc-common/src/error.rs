//! Error types for glider QC.

use thiserror::Error;

/// Result type alias for glider QC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for glider QC.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown preset: {0}")]
    InvalidPreset(String),

    #[error("config bundle integrity check failed: {0}")]
    BundleIntegrity(String),

    // Dataset errors (20-29)
    #[error("unknown variable: {name}")]
    UnknownVariable { name: String },

    #[error("series length mismatch for {variable}: expected {expected}, got {actual}")]
    InconsistentLength {
        variable: String,
        expected: usize,
        actual: usize,
    },

    #[error("dataset is missing required variable: {name}")]
    MissingRequired { name: String },

    #[error("flag {flag} outside the {scale} domain for {variable}")]
    FlagOutOfRange {
        variable: String,
        flag: u8,
        scale: String,
    },

    // Recoverable conditions (30-39)
    #[error("{variable} depends on {dependency}, which is absent")]
    MissingDependency {
        variable: String,
        dependency: String,
    },

    #[error("malformed instrument metadata: {0}")]
    MalformedMetadata(String),

    #[error("{variable} has no observations")]
    EmptySeries { variable: String },

    // Test battery errors (40-49)
    #[error("test battery {battery} failed: {message}")]
    Battery { battery: String, message: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used for detailed error reporting in JSON output.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidPreset(_) => 11,
            Error::BundleIntegrity(_) => 12,
            Error::UnknownVariable { .. } => 20,
            Error::InconsistentLength { .. } => 21,
            Error::MissingRequired { .. } => 22,
            Error::FlagOutOfRange { .. } => 23,
            Error::MissingDependency { .. } => 30,
            Error::MalformedMetadata(_) => 31,
            Error::EmptySeries { .. } => 32,
            Error::Battery { .. } => 40,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Whether the condition is expected in normal operation and recovered
    /// locally (missing sensor, unparseable metadata, empty series).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MissingDependency { .. } | Error::MalformedMetadata(_) | Error::EmptySeries { .. }
        )
    }
}
