use insight_analyzers::AnalyzerError;
use insight_graph::GraphError;
use insight_metadata::MetadataError;
use insight_parser::ParserError;
use insight_vector_store::VectorStoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid repository path: {0}")]
    InvalidPath(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Parser error: {0}")]
    Parser(#[from] ParserError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Vector store error: {0}")]
    Vector(#[from] VectorStoreError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Failure class reported for a run or counted in its stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Parse,
    StoreWrite,
    StoreUnavailable,
    Analyzer,
    Config,
    Cache,
    Cancelled,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::StoreWrite => "store_write",
            Self::StoreUnavailable => "store_unavailable",
            Self::Analyzer => "analyzer",
            Self::Config => "config",
            Self::Cache => "cache",
            Self::Cancelled => "cancelled",
        }
    }
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) | Self::InvalidPath(_) | Self::Toml(_) => ErrorClass::Config,
            Self::StoreUnavailable(_) => ErrorClass::StoreUnavailable,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Parser(_) => ErrorClass::Parse,
            Self::Graph(GraphError::StoreUnavailable(_)) => ErrorClass::StoreUnavailable,
            Self::Vector(VectorStoreError::StoreUnavailable(_)) => ErrorClass::StoreUnavailable,
            Self::Vector(VectorStoreError::InvalidConfig(_) | VectorStoreError::Tokenizer(_)) => {
                ErrorClass::Config
            }
            Self::Graph(GraphError::Metadata(_)) => ErrorClass::Cache,
            Self::Graph(_) | Self::Vector(_) | Self::IoError(_) | Self::SerializationError(_) => {
                ErrorClass::StoreWrite
            }
            Self::Metadata(_) => ErrorClass::Cache,
            Self::Analyzer(_) => ErrorClass::Analyzer,
        }
    }

    /// Only these end a run as `Failed`
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Config | ErrorClass::StoreUnavailable
        )
    }
}
