//! Error hierarchy for the I/O shell around the metrics core
//!
//! The metrics engine and trend analyzer never fail; these errors come from
//! loading history, writing the visit archive, exporting reports and reading
//! configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for biva operations
#[derive(Debug, Error)]
pub enum BivaError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading/writing errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// History source errors
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// Report serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors raised while reading a patient's visit history
#[derive(Debug, Error)]
pub enum HistoryError {
    /// History file does not exist
    #[error("History file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// No column identifies the patient
    #[error("No patient column in {path}")]
    MissingPatientColumn { path: PathBuf },

    /// Header row missing or empty
    #[error("Missing header row in {path}")]
    MissingHeader { path: PathBuf },
}

/// Result type alias for biva operations
pub type Result<T> = std::result::Result<T, BivaError>;

impl BivaError {
    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BivaError::History(HistoryError::FileNotFound { .. }) => ErrorSeverity::Warning,
            BivaError::History(_) => ErrorSeverity::Warning,
            BivaError::Csv(_) => ErrorSeverity::Error,
            BivaError::Io(_) => ErrorSeverity::Error,
            BivaError::Serialization(_) => ErrorSeverity::Error,
            BivaError::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            BivaError::History(HistoryError::FileNotFound { path }) => {
                format!(
                    "No visit history at {}. The report will show no baseline.",
                    path.display()
                )
            }
            BivaError::History(HistoryError::MissingPatientColumn { .. }) => {
                "The history file has no patient/name column, so visits cannot be matched."
                    .to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical error requiring immediate attention
    Critical,
    /// Error that prevents the operation
    Error,
    /// Warning that doesn't prevent operation
    Warning,
}
