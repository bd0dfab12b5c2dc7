// Library interface for biva modules
// The binary and the integration tests both go through this crate root

pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod report;
pub mod trend;

// Re-export commonly used types for convenience
pub use models::*;
pub use metrics::{BivaVector, DegradedInput, EngineConfig, MetricsEngine, MetricsOutcome};
pub use trend::{
    AsymmetryResult, AsymmetrySide, Baseline, TrendAnalyzer, TrendConfig, TrendDirection,
    TrendResult,
};
pub use history::{HistorySchema, HistoryStore};
pub use report::{PatientProfile, ReportPayload};
pub use config::AppConfig;
pub use error::{BivaError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
