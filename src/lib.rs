//! # codeseek: incremental code indexing and hybrid search
//!
//! Ingests a source repository, partitions it into semantically meaningful
//! chunks, attaches vector and full-text indices, and persists everything
//! to a single embedded SQLite file. Search fuses dense (cosine) and
//! sparse (BM25) retrieval with reciprocal-rank fusion.
//!
//! ## Architecture
//!
//! - [`store::SqliteStore`] owns the database; indexer, searcher and status
//!   consume it as a shared capability.
//! - [`indexer::Indexer`] runs the incremental pipeline: content-addressed
//!   change detection (SHA-256), bounded-concurrency batches, transactional
//!   writes, embedding with orphan reconciliation.
//! - [`searcher::Searcher`] serves vector / keyword / hybrid queries.
//! - The AST parser, chunker, and embedding provider are external
//!   collaborators behind the [`parser::SourceParser`], [`chunker::Chunker`]
//!   and [`embedder::Embedder`] traits.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use codeseek::{Indexer, IndexOptions, Searcher, SearchMode, SearchRequest};
//! use codeseek::store::SqliteStore;
//! # use codeseek::parser::SourceParser;
//! # use codeseek::chunker::Chunker;
//! # async fn demo(parser: Arc<dyn SourceParser>, chunker: Arc<dyn Chunker>) -> anyhow::Result<()> {
//! let store = Arc::new(SqliteStore::open(Path::new("index.db")).await?);
//! let indexer = Indexer::new(Arc::clone(&store), parser, chunker, None);
//! let stats = indexer.index_project(Path::new("."), IndexOptions::default()).await?;
//! println!("{stats}");
//!
//! let searcher = Searcher::new(store, None);
//! let response = searcher
//!     .search(&SearchRequest::new(1, "parse configuration", SearchMode::Keyword))
//!     .await?;
//! println!("{} hits", response.total);
//! # Ok(())
//! # }
//! ```

pub mod chunker;
pub mod embedder;
pub mod indexer;
pub mod lock;
pub mod parser;
pub mod searcher;
pub mod status;
pub mod store;
pub mod vector;

pub(crate) mod fts;

pub use indexer::{IndexError, IndexOptions, IndexStats, Indexer};
pub use lock::IndexLock;
pub use searcher::{
    Definition, SearchError, SearchHit, SearchMode, SearchRequest, SearchResponse, Searcher,
};
pub use status::{ProjectStatus, StatusError, StatusReporter};
pub use store::{SearchFilters, SqliteStore, VectorBackendKind};

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Directory under the user's data dir that holds index databases.
const INDEX_DIR: &str = "codeseek/indices";

/// Default database path for a project root: one file per project in a
/// per-user indices directory, named by a hash of the canonical root so
/// renamed checkouts don't collide.
///
/// Falls back to `<root>/.codeseek/index.db` when no user data directory
/// is available (e.g. stripped-down containers).
pub fn default_index_path(project_root: &Path) -> PathBuf {
    let canonical = dunce::canonicalize(project_root)
        .unwrap_or_else(|_| project_root.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let name = format!("{:016x}.db", u64::from_be_bytes(digest[..8].try_into().expect("8 bytes")));

    match dirs::data_dir() {
        Some(data) => data.join(INDEX_DIR).join(name),
        None => canonical.join(".codeseek").join("index.db"),
    }
}
