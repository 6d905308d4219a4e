//! Store row types, write inputs, search filters, and errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::PatternFlags;

/// Length of a file content hash (SHA-256).
pub const CONTENT_HASH_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("Invalid schema version string '{0}'")]
    InvalidVersion(String),
    #[error("Migration {version} failed: {message}")]
    MigrationFailed { version: String, message: String },
    #[error("Invalid search filter: {0}")]
    InvalidFilter(String),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

// ============ Entity rows ============

/// One indexed project (one database file holds one or more).
#[derive(Debug, Clone, Serialize)]
pub struct ProjectRecord {
    pub id: i64,
    pub root_path: String,
    pub module_name: String,
    pub language_version: String,
    pub total_files: i64,
    pub total_chunks: i64,
    /// Schema version current when the project row was created.
    pub index_version: String,
    pub last_indexed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One indexed source file.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub project_id: i64,
    pub rel_path: String,
    pub package_name: String,
    /// SHA-256 of the raw bytes, the sole change-detection authority.
    pub content_hash: Vec<u8>,
    /// Stored for display; never compared for change detection.
    pub mod_time: Option<String>,
    pub size_bytes: i64,
    pub parse_error: Option<String>,
    pub last_indexed_at: Option<String>,
}

/// One parsed symbol.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolRecord {
    pub id: i64,
    pub file_id: i64,
    pub name: String,
    pub kind: String,
    pub package_name: String,
    pub signature: String,
    pub doc: String,
    pub scope: String,
    pub receiver: String,
    pub start_line: i64,
    pub start_col: i64,
    pub end_line: i64,
    pub end_col: i64,
    pub patterns: PatternFlags,
}

/// One retrieval chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRecord {
    pub id: i64,
    pub file_id: i64,
    pub symbol_id: Option<i64>,
    pub content: String,
    pub content_hash: String,
    pub token_count: i64,
    pub start_line: i64,
    pub end_line: i64,
    pub context_before: String,
    pub context_after: String,
    pub chunk_type: String,
}

/// One stored embedding. `vector` is the decoded form of the blob.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub id: i64,
    pub chunk_id: i64,
    pub vector: Vec<f32>,
    pub dimension: i64,
    pub provider: String,
    pub model: String,
}

/// One import declaration.
#[derive(Debug, Clone, Serialize)]
pub struct ImportRecord {
    pub id: i64,
    pub file_id: i64,
    pub import_path: String,
    pub alias: String,
}

// ============ Write inputs ============

/// Input for [`crate::store::StoreTx::upsert_file`].
#[derive(Debug, Clone)]
pub struct NewFile {
    pub project_id: i64,
    pub rel_path: String,
    pub package_name: String,
    pub content_hash: [u8; CONTENT_HASH_LEN],
    pub mod_time: Option<String>,
    pub size_bytes: i64,
    pub parse_error: Option<String>,
}

/// Input for [`crate::store::StoreTx::upsert_symbol`].
#[derive(Debug, Clone)]
pub struct NewSymbol {
    pub file_id: i64,
    pub name: String,
    pub kind: String,
    pub package_name: String,
    pub signature: String,
    pub doc: String,
    pub scope: String,
    pub receiver: String,
    pub start_line: i64,
    pub start_col: i64,
    pub end_line: i64,
    pub end_col: i64,
    pub patterns: PatternFlags,
}

/// Input for [`crate::store::StoreTx::upsert_chunk`].
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub file_id: i64,
    pub symbol_id: Option<i64>,
    pub content: String,
    pub content_hash: String,
    pub token_count: i64,
    pub start_line: i64,
    pub end_line: i64,
    pub context_before: String,
    pub context_after: String,
    pub chunk_type: String,
}

/// Input for [`crate::store::StoreTx::upsert_import`].
#[derive(Debug, Clone)]
pub struct NewImport {
    pub file_id: i64,
    pub import_path: String,
    pub alias: String,
}

/// Input for storing one embedding. The vector is encoded to a blob on
/// write; its length must equal the declared dimension.
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    pub chunk_id: i64,
    pub vector: Vec<f32>,
    pub provider: String,
    pub model: String,
}

// ============ Search ============

/// A candidate chunk with its retrieval score. Vector scores are
/// normalized cosine in [0, 1]; text scores are negated bm25 (higher is
/// better, unbounded).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: i64,
    pub score: f64,
}

/// Filters applied by both retrieval paths.
///
/// Empty collections match everything. `min_relevance` applies to
/// normalized scores in [0, 1].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Restrict to chunks whose linked symbol has one of these kinds.
    pub symbol_kinds: Vec<String>,
    /// Glob over the file's relative path, e.g. `internal/**/*.go`.
    pub file_glob: Option<String>,
    /// Restrict to chunks whose linked symbol carries one of these
    /// domain-pattern flags (names per [`PatternFlags::NAMES`]).
    pub ddd_patterns: Vec<String>,
    /// Restrict to files in one of these packages.
    pub packages: Vec<String>,
    /// Drop results scoring below this normalized threshold.
    pub min_relevance: f64,
}

impl SearchFilters {
    /// Validate filter constraints before searching.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !(0.0..=1.0).contains(&self.min_relevance) {
            return Err(StoreError::InvalidFilter(format!(
                "min_relevance must be in [0, 1], got {}",
                self.min_relevance
            )));
        }
        for pattern in &self.ddd_patterns {
            if !PatternFlags::NAMES.contains(&pattern.as_str()) {
                return Err(StoreError::InvalidFilter(format!(
                    "unknown ddd pattern '{pattern}'"
                )));
            }
        }
        if let Some(glob) = &self.file_glob {
            if globset::Glob::new(glob).is_err() {
                return Err(StoreError::InvalidFilter(format!(
                    "invalid file glob '{glob}'"
                )));
            }
        }
        Ok(())
    }

    /// Whether any symbol-level filter is set (drives the join shape).
    pub(crate) fn needs_symbol_join(&self) -> bool {
        !self.symbol_kinds.is_empty() || !self.ddd_patterns.is_empty()
    }
}
