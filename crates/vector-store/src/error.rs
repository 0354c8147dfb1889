use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Index error: {0}")]
    IndexError(String),

    /// A write the store may accept on retry
    #[error("Vector store write failed: {0}")]
    StoreWrite(String),

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

impl VectorStoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreWrite(_))
    }
}
