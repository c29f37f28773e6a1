//! Error types for the reminder engine.

/// Top-level error type for the scheduling and delivery engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed reminder definition, rejected at the decode boundary.
    #[error("validation error: {0}")]
    Validation(String),

    /// Startup-time configuration error (invalid timezone, bad tick
    /// interval). The only fatal class: the engine must not start.
    #[error("config error: {0}")]
    Config(String),

    /// Fire ledger read/write error.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Reminder source or notification store error.
    #[error("store error: {0}")]
    Store(String),

    /// Push stream transport error.
    #[error("stream error: {0}")]
    Stream(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
