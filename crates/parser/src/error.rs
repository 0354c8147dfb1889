use thiserror::Error;

/// Result type for parser operations
pub type Result<T> = std::result::Result<T, ParserError>;

/// Errors that can occur while extracting a graph from source
#[derive(Error, Debug)]
pub enum ParserError {
    /// Source bytes are not valid UTF-8
    #[error("Invalid UTF-8 in {path}: {source}")]
    InvalidUtf8 {
        path: String,
        #[source]
        source: std::str::Utf8Error,
    },

    /// Tree-sitter could not load a grammar or produce a tree
    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),

    /// Language has no grammar wired in
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// IO error while reading a repository
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ParserError {
    pub fn tree_sitter(msg: impl Into<String>) -> Self {
        Self::TreeSitter(msg.into())
    }
}
