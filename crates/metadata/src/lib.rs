//! # Insight Metadata
//!
//! Relational records for completed builds: one [`GraphSnapshot`] per loaded
//! commit and one [`VectorIndexRecord`] per built similarity index. Lookups by
//! commit hash are how redundant rebuilds are skipped.

mod error;
mod model;
mod sqlite;
mod store;

pub use error::{MetadataError, Result};
pub use model::{GraphSnapshot, VectorIndexRecord, DEFAULT_BRANCH, DEFAULT_EMBEDDING_DIMENSION};
pub use sqlite::SqliteMetadataStore;
pub use store::MetadataStore;
