//! Start-up error types.

use ledger::LedgerError;
use thiserror::Error;

/// Errors that stop the service from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger setup failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Metrics exporter failed: {0}")]
    Metrics(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, StartupError>;
