use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasightError {
    #[error("Missing context: {0}")]
    MissingContext(String),

    #[error("Query rejected: {0}")]
    QueryRejected(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Connection pool exhausted (waited {0:?})")]
    PoolExhausted(Duration),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Payload too large: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

pub type Result<T> = std::result::Result<T, DatasightError>;
