//! Error types for restic-warden.

/// Top-level error type for the backup scheduler.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Scheduler state record could not be persisted or its directory created.
    #[error("state error: {0}")]
    State(String),

    /// External process could not be launched or signalled.
    #[error("process error: {0}")]
    Process(String),

    /// Another instance already owns the pid file.
    #[error("already running (pid {pid})")]
    AlreadyRunning {
        /// Pid recorded by the live instance.
        pid: u32,
    },

    /// An operation is already in flight; only one may run at a time.
    #[error("operation already in flight: {0}")]
    Busy(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, WardenError>;
