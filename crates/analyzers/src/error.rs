use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalyzerError>;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("{analyzer} does not apply to {file_path}")]
    NotApplicable { analyzer: String, file_path: String },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Panicked: {0}")]
    Panic(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Graph error: {0}")]
    Graph(#[from] insight_graph::GraphError),

    #[error("Vector store error: {0}")]
    Vector(#[from] insight_vector_store::VectorStoreError),
}

impl AnalyzerError {
    /// Short class name recorded as `metadata.error_type` in failure envelopes
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotApplicable { .. } => "NotApplicable",
            Self::Execution(_) => "ExecutionError",
            Self::Llm(_) => "LlmError",
            Self::Timeout(_) => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::Panic(_) => "Panic",
            Self::NotFound(_) => "NotFound",
            Self::IoError(_) => "IoError",
            Self::SerializationError(_) => "SerializationError",
            Self::Http(_) => "HttpError",
            Self::Graph(_) => "GraphError",
            Self::Vector(_) => "VectorStoreError",
        }
    }
}
