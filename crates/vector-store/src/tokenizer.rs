use crate::error::{Result, VectorStoreError};
use std::path::Path;
use unicode_segmentation::UnicodeSegmentation;

/// Splits text into tokens whose concatenation is the original text
pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &str;

    fn tokenize<'a>(&self, text: &'a str) -> Vec<&'a str>;
}

/// Unicode word-boundary segmentation (UAX #29).
///
/// Whitespace runs and punctuation are tokens of their own, so nothing is
/// lost and token counts stay close to what a subword tokenizer would see
/// for source code.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordBoundaryTokenizer;

impl Tokenizer for WordBoundaryTokenizer {
    fn name(&self) -> &str {
        "word-boundary"
    }

    fn tokenize<'a>(&self, text: &'a str) -> Vec<&'a str> {
        text.split_word_bounds().collect()
    }
}

/// HuggingFace `tokenizer.json` tokenizer.
///
/// Tokens are slices of the input between consecutive token offsets, so the
/// gaps a model tokenizer normally discards (spaces, newlines) stay attached
/// to the preceding token.
pub struct HfTokenizer {
    name: String,
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            VectorStoreError::Tokenizer(format!("load {} failed: {e}", path.display()))
        })?;
        Ok(Self {
            name: path.display().to_string(),
            inner,
        })
    }

    fn boundaries(&self, text: &str) -> Option<Vec<usize>> {
        let encoding = self.inner.encode(text, false).ok()?;
        let mut starts: Vec<usize> = encoding
            .get_offsets()
            .iter()
            .map(|(start, _)| *start)
            .filter(|start| *start < text.len() && text.is_char_boundary(*start))
            .collect();
        starts.sort_unstable();
        starts.dedup();
        if starts.first() != Some(&0) {
            starts.insert(0, 0);
        }
        Some(starts)
    }
}

impl Tokenizer for HfTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn tokenize<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if text.is_empty() {
            return Vec::new();
        }
        let Some(starts) = self.boundaries(text) else {
            log::warn!("Tokenizer {} failed, falling back to word bounds", self.name);
            return WordBoundaryTokenizer.tokenize(text);
        };
        let mut tokens = Vec::with_capacity(starts.len());
        for (i, start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            tokens.push(&text[*start..end]);
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn word_bounds_are_lossless() {
        let text = "def add(a, b):\n    return a + b  # sum\n";
        let tokens = WordBoundaryTokenizer.tokenize(text);
        assert_eq!(tokens.concat(), text);
        assert!(tokens.contains(&"return"));
        assert!(tokens.contains(&"\n"));
    }

    #[test]
    fn empty_text_has_no_tokens() {
        assert!(WordBoundaryTokenizer.tokenize("").is_empty());
    }

    #[test]
    fn missing_tokenizer_file_is_an_error() {
        let err = HfTokenizer::from_file(Path::new("/nonexistent/tokenizer.json"))
            .err()
            .unwrap();
        assert!(matches!(err, VectorStoreError::Tokenizer(_)));
    }
}
