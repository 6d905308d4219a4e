//! Project status and health reporting.
//!
//! Composes cheap store queries into a single snapshot. Only the project
//! lookup is fatal; the health probes report degradation instead of
//! failing the whole report.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::embedder::Embedder;
use crate::store::{ProjectRecord, SqliteStore, StoreError};

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("project {0} not found")]
    ProjectNotFound(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Health probe results. Each probe is a cheap SQL existence check or a
/// provider ping, never a scan.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub database_accessible: bool,
    pub embeddings_available: bool,
    pub fts_ready: bool,
}

/// Aggregated status for one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub project: ProjectRecord,
    pub files_count: i64,
    pub symbols_count: i64,
    pub chunks_count: i64,
    pub embeddings_count: i64,
    /// Chunk count per chunk type.
    pub chunks_by_type: HashMap<String, i64>,
    /// Symbol count per kind.
    pub symbols_by_kind: HashMap<String, i64>,
    /// On-disk index size in bytes (main database plus WAL).
    pub index_size: u64,
    pub last_indexed_at: Option<String>,
    pub health: HealthReport,
}

/// Status reporter over the shared store capability.
pub struct StatusReporter {
    store: Arc<SqliteStore>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl StatusReporter {
    pub fn new(store: Arc<SqliteStore>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { store, embedder }
    }

    /// Build the status snapshot for one project.
    pub async fn get_status(&self, project_id: i64) -> Result<ProjectStatus, StatusError> {
        let project = match self.store.get_project(project_id).await {
            Ok(project) => project,
            Err(StoreError::NotFound { .. }) => {
                return Err(StatusError::ProjectNotFound(project_id))
            }
            Err(e) => return Err(e.into()),
        };

        let files_count = self.store.count_files(project_id).await?;
        let symbols_count = self.store.count_symbols(project_id).await?;
        let chunks_count = self.store.count_chunks(project_id).await?;
        let embeddings_count = self.store.count_embeddings(project_id).await?;
        let chunks_by_type: HashMap<String, i64> =
            self.store.chunks_by_type(project_id).await?.into_iter().collect();
        let symbols_by_kind: HashMap<String, i64> =
            self.store.symbols_by_kind(project_id).await?.into_iter().collect();

        let embeddings_available = match &self.embedder {
            Some(embedder) => embedder.is_available().await,
            None => false,
        };
        let health = HealthReport {
            database_accessible: self.store.ping().await,
            embeddings_available,
            fts_ready: self.store.fts_ready().await,
        };

        tracing::debug!(
            project_id,
            files = files_count,
            chunks = chunks_count,
            embeddings = embeddings_count,
            "Status snapshot"
        );

        Ok(ProjectStatus {
            last_indexed_at: project.last_indexed_at.clone(),
            index_size: self.store.index_size(),
            project,
            files_count,
            symbols_count,
            chunks_count,
            embeddings_count,
            chunks_by_type,
            symbols_by_kind,
            health,
        })
    }
}
