use thiserror::Error;

use crate::application::transfer::TransferError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid download key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),
}
