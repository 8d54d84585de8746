use thiserror::Error;

/// Errors produced by the credential lifecycle.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// A required credential or setting is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The persisted store could not be read or written.
    #[error("Store I/O error: {0}")]
    Store(#[from] std::io::Error),

    /// The conversational session failed to open, respond, or close.
    #[error("Session error: {0}")]
    Session(String),

    /// The login browser could not be driven.
    #[error("Browser error: {0}")]
    Browser(String),
}

pub type Result<T> = std::result::Result<T, KeeperError>;
