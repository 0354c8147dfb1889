use crate::error::{Result, VectorStoreError};
use crate::tokenizer::{Tokenizer, WordBoundaryTokenizer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_CHUNK_SIZE: usize = 200;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Window of tokens from one file, the unit of embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub text: String,
    pub file_id: String,
    pub chunk_index: usize,
    pub token_count: usize,
    /// Inclusive start token offset
    pub start_token: usize,
    /// Exclusive end token offset
    pub end_token: usize,
}

/// Token-count sliding window.
///
/// Windows start every `size - overlap` tokens; the last window may be short.
#[derive(Clone)]
pub struct Chunker {
    size: usize,
    overlap: usize,
    tokenizer: Arc<dyn Tokenizer>,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("size", &self.size)
            .field("overlap", &self.overlap)
            .field("tokenizer", &self.tokenizer.name())
            .finish()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            tokenizer: Arc::new(WordBoundaryTokenizer),
        }
    }
}

impl Chunker {
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        Self::with_tokenizer(size, overlap, Arc::new(WordBoundaryTokenizer))
    }

    pub fn with_tokenizer(
        size: usize,
        overlap: usize,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        if size == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if overlap >= size {
            return Err(VectorStoreError::InvalidConfig(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({size})"
            )));
        }
        Ok(Self {
            size,
            overlap,
            tokenizer,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn chunk(&self, file_id: &str, content: &str) -> Vec<CodeChunk> {
        let tokens = self.tokenizer.tokenize(content);
        let total = tokens.len();
        let step = self.size - self.overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < total {
            let end = (start + self.size).min(total);
            chunks.push(CodeChunk {
                text: tokens[start..end].concat(),
                file_id: file_id.to_string(),
                chunk_index: chunks.len(),
                token_count: end - start,
                start_token: start,
                end_token: end,
            });
            if end == total {
                break;
            }
            start += step;
        }
        chunks
    }
}

/// Expected window count for `tokens` tokens; at least one for non-empty input
pub fn expected_chunk_count(tokens: usize, size: usize, overlap: usize) -> usize {
    if tokens == 0 {
        return 0;
    }
    if tokens <= overlap {
        return 1;
    }
    let step = size - overlap;
    (tokens - overlap).div_ceil(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    fn reconstruct(chunks: &[CodeChunk], tokenizer: &dyn Tokenizer) -> String {
        let mut out = String::new();
        let mut consumed = 0;
        for chunk in chunks {
            let tokens = tokenizer.tokenize(&chunk.text);
            let skip = consumed - chunk.start_token;
            out.push_str(&tokens[skip..].concat());
            consumed = chunk.end_token;
        }
        out
    }

    #[test]
    fn invalid_windows_are_config_errors() {
        assert!(matches!(
            Chunker::new(0, 0),
            Err(VectorStoreError::InvalidConfig(_))
        ));
        assert!(matches!(
            Chunker::new(10, 10),
            Err(VectorStoreError::InvalidConfig(_))
        ));
        assert!(Chunker::new(10, 9).is_ok());
    }

    #[test]
    fn windows_cover_all_tokens() {
        let chunker = Chunker::new(10, 3).unwrap();
        for n in [1usize, 5, 10, 11, 17, 40, 97] {
            // word + space pairs, minus the trailing space
            let text = words(n);
            let total = WordBoundaryTokenizer.tokenize(&text).len();
            let chunks = chunker.chunk("file:a.py", &text);

            assert_eq!(chunks.len(), expected_chunk_count(total, 10, 3), "n = {n}");
            assert_eq!(reconstruct(&chunks, &WordBoundaryTokenizer), text);
            assert_eq!(chunks.last().map(|c| c.end_token), Some(total));
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.chunk_index, i);
                assert_eq!(chunk.start_token, i * 7);
                assert!(chunk.token_count <= 10);
            }
        }
    }

    #[test]
    fn empty_and_tiny_inputs() {
        let chunker = Chunker::new(10, 4).unwrap();
        assert!(chunker.chunk("file:a.py", "").is_empty());

        let tiny = chunker.chunk("file:a.py", "x = 1");
        assert_eq!(tiny.len(), 1);
        assert_eq!(tiny[0].text, "x = 1");
    }

    #[test]
    fn defaults_match_documented_window() {
        let chunker = Chunker::default();
        assert_eq!((chunker.size(), chunker.overlap()), (200, 50));
        assert_eq!(expected_chunk_count(200, 200, 50), 1);
        assert_eq!(expected_chunk_count(201, 200, 50), 2);
        assert_eq!(expected_chunk_count(50, 200, 50), 1);
    }
}
