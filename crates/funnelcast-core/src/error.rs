//! Error taxonomy shared across all Funnelcast crates.

use thiserror::Error;

/// Errors surfaced by Funnelcast components.
#[derive(Debug, Error)]
pub enum FunnelcastError {
    /// Configuration file missing, unreadable, or invalid.
    #[error("config error: {0}")]
    Config(String),

    /// Database open, migration, or query failure.
    #[error("database error: {0}")]
    Db(String),

    /// Outbound transport (Bot API) failure.
    #[error("channel error: {0}")]
    Channel(String),

    /// Malformed or impossible schedule input.
    #[error("schedule error: {0}")]
    Schedule(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FunnelcastError>;
