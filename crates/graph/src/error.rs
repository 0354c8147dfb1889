use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    /// A batch write failed; the store may accept a retry
    #[error("Graph store write failed: {0}")]
    StoreWrite(String),

    /// The store refused writes after retries, or cannot be reached at all
    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    /// The caller sent records of another type than the batch declares
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] insight_metadata::MetadataError),
}

impl GraphError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreWrite(_))
    }
}
