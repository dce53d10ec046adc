use facescan_core::IndexError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("embedding dimension mismatch: store expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt data: {0}")]
    Corrupt(String),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
}
