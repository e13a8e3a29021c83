//! Error types shared across the tracker

use thiserror::Error;

/// Failure to turn a BaseStation line into a message
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message has {0} fields, expected at least {1}")]
    TooFewFields(usize, usize),

    #[error("invalid value {value:?} for field {field}")]
    InvalidField { field: &'static str, value: String },
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("database pool setup failed: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("invalid stored value in {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}

/// External API failures
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned status {status}")]
    Status { service: &'static str, status: u16 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Message reader failures
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons the tracker run loop ends
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracking cancelled")]
    Cancelled,

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error("tracker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
