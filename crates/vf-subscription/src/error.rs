//! Error types for subscription loading

use std::path::PathBuf;
use thiserror::Error;

pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid subscription document: {0}")]
    Parse(String),
}
