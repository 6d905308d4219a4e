//! SQLite persistence for projects, files, symbols, chunks and embeddings.
//!
//! One database file holds the full index. The store owns the connection
//! pool; the indexer, searcher and status components consume it as a shared
//! capability (`Arc<SqliteStore>`). Writes during indexing go through
//! [`StoreTx`], which subsumes the mutating API; reads run directly on the
//! pool.
//!
//! ## Module structure
//!
//! - `types`: row types, write inputs, filters, errors
//! - `migrations`: semver-ordered schema migrations
//! - `writer`: the transactional write handle
//! - `backend`: vector-search capability (SIMD and scalar implementations)
//! - `search`: vector/text retrieval and hydration accessors

pub mod backend;
pub mod migrations;
mod search;
mod types;
mod writer;

use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

pub use backend::{VectorBackend, VectorBackendKind};
pub use migrations::CURRENT_SCHEMA_VERSION;
pub use types::{
    ChunkRecord, EmbeddingRecord, FileRecord, ImportRecord, NewChunk, NewEmbedding, NewFile,
    NewImport, NewSymbol, ProjectRecord, ScoredChunk, SearchFilters, StoreError, SymbolRecord,
    CONTENT_HASH_LEN,
};
pub use writer::StoreTx;

use crate::vector::encode_vector;

/// Async SQLite store for one index database.
///
/// Uses sqlx connection pooling with WAL mode for concurrent reads and a
/// single writer. All multi-row writes go through [`SqliteStore::begin_tx`].
///
/// # Example
///
/// ```no_run
/// use codeseek::store::SqliteStore;
/// use std::path::Path;
///
/// # async fn demo() -> Result<(), codeseek::store::StoreError> {
/// let store = SqliteStore::open(Path::new("index.db")).await?;
/// let projects = store.list_projects().await?;
/// println!("{} projects indexed", projects.len());
/// # Ok(())
/// # }
/// ```
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
    backend: Box<dyn VectorBackend>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if missing) an index database with the default vector
    /// backend for this build.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_backend(path, VectorBackendKind::default()).await
    }

    /// Open with an explicit vector backend. Tests use this to cross-check
    /// the SIMD and scalar implementations against each other.
    pub async fn open_with_backend(
        path: &Path,
        kind: VectorBackendKind,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4) // typical concurrency: one writer + readers
            .idle_timeout(std::time::Duration::from_secs(300))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    // Foreign key enforcement is off by default in SQLite
                    sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                    // WAL: concurrent reads, single writer
                    sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                    sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                    // NORMAL sync is safe under WAL
                    sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
                    // 16MB page cache (negative = KB)
                    sqlx::query("PRAGMA cache_size = -16384").execute(&mut *conn).await?;
                    sqlx::query("PRAGMA temp_store = MEMORY").execute(&mut *conn).await?;
                    // FTS triggers must fire for FK-cascaded deletes
                    sqlx::query("PRAGMA recursive_triggers = ON").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await?;

        // The index holds code content; keep it out of other users' reach.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let restrictive = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, restrictive.clone());
            for ext in ["db-wal", "db-shm"] {
                let _ = std::fs::set_permissions(path.with_extension(ext), restrictive.clone());
            }
        }

        migrations::apply(&pool, migrations::SCHEMA_MIGRATIONS).await?;

        tracing::info!(path = %path.display(), backend = kind.name(), "Index database ready");

        Ok(Self {
            pool,
            backend: kind.build(),
            db_path: path.to_path_buf(),
        })
    }

    /// Name of the active vector backend (`"simd"` or `"scalar"`).
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub(crate) fn backend(&self) -> &dyn VectorBackend {
        self.backend.as_ref()
    }

    /// Begin a write transaction. The returned handle carries every
    /// mutating operation; drop without commit rolls back.
    pub async fn begin_tx(&self) -> Result<StoreTx<'_>, StoreError> {
        Ok(StoreTx::new(self.pool.begin().await?))
    }

    /// Cheap liveness probe.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Whether the FTS virtual tables exist (the 1.1.0 migration ran).
    pub async fn fts_ready(&self) -> bool {
        let row: Result<Option<(String,)>, _> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
        )
        .fetch_optional(&self.pool)
        .await;
        matches!(row, Ok(Some(_)))
    }

    /// On-disk size of the index in bytes. Includes the WAL and shared
    /// memory files: under WAL mode recent commits live there until a
    /// checkpoint folds them into the main file.
    pub fn index_size(&self) -> u64 {
        let file_len = |path: &Path| std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        file_len(&self.db_path)
            + file_len(&self.db_path.with_extension("db-wal"))
            + file_len(&self.db_path.with_extension("db-shm"))
    }

    /// Checkpoint the WAL and close the pool. Recommended for clean
    /// shutdown; skipping it only leaves a WAL file to replay on next open.
    pub async fn close(self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        self.pool.close().await;
        tracing::debug!("Store closed with WAL checkpoint");
        Ok(())
    }

    // ============ Projects ============

    /// Look up a project by canonical root path.
    pub async fn get_project_by_root(
        &self,
        root_path: &str,
    ) -> Result<Option<ProjectRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM projects WHERE root_path = ?1")
            .bind(root_path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Self::project_from_row(&row)))
    }

    /// Look up a project by id.
    pub async fn get_project(&self, project_id: i64) -> Result<ProjectRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("project", project_id))?;
        Ok(Self::project_from_row(&row))
    }

    /// All projects in this database.
    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::project_from_row).collect())
    }

    /// Create a project row. `index_version` records the schema version in
    /// force at creation.
    pub async fn create_project(
        &self,
        root_path: &str,
        module_name: &str,
        language_version: &str,
    ) -> Result<ProjectRecord, StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO projects
                (root_path, module_name, language_version, index_version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             RETURNING id",
        )
        .bind(root_path)
        .bind(module_name)
        .bind(language_version)
        .bind(CURRENT_SCHEMA_VERSION)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(project_id = id, root = root_path, "Project created");
        self.get_project(id).await
    }

    /// Refresh a project's rolling totals and `last_indexed_at` after an
    /// indexing run.
    pub async fn update_project_totals(&self, project_id: i64) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE projects SET
                total_files = (SELECT COUNT(*) FROM files WHERE project_id = ?1),
                total_chunks = (
                    SELECT COUNT(*) FROM chunks c
                    JOIN files f ON c.file_id = f.id
                    WHERE f.project_id = ?1
                ),
                last_indexed_at = ?2,
                updated_at = ?2
             WHERE id = ?1",
        )
        .bind(project_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============ Files ============

    /// Look up a file row by `(project, rel_path)`.
    pub async fn get_file_by_path(
        &self,
        project_id: i64,
        rel_path: &str,
    ) -> Result<Option<FileRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM files WHERE project_id = ?1 AND rel_path = ?2")
            .bind(project_id)
            .bind(rel_path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Self::file_from_row(&row)))
    }

    /// All file rows for a project, ordered by path.
    pub async fn list_files(&self, project_id: i64) -> Result<Vec<FileRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM files WHERE project_id = ?1 ORDER BY rel_path")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::file_from_row).collect())
    }

    // ============ Embeddings ============

    /// Store one embedding per `(chunk, vector)` pair in a single
    /// transaction. Vectors are encoded as little-endian f32 blobs; the
    /// schema CHECK enforces `length(vector) == dimension * 4`.
    pub async fn insert_embeddings(&self, rows: &[NewEmbedding]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO embeddings (chunk_id, vector, dimension, provider, model)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                    vector = excluded.vector,
                    dimension = excluded.dimension,
                    provider = excluded.provider,
                    model = excluded.model",
            )
            .bind(row.chunk_id)
            .bind(encode_vector(&row.vector))
            .bind(row.vector.len() as i64)
            .bind(&row.provider)
            .bind(&row.model)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    // ============ Batched deletes ============

    /// Delete chunks by id, in IN-clause batches. Embeddings cascade.
    /// Returns the number of rows deleted. Used by orphan reconciliation,
    /// which runs in its own transaction so a failure here can never revert
    /// committed index writes.
    pub async fn delete_chunks_batch(&self, chunk_ids: &[i64]) -> Result<u64, StoreError> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }
        const BATCH: usize = 500;
        let mut deleted = 0u64;
        let mut tx = self.pool.begin().await?;
        for ids in chunk_ids.chunks(BATCH) {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "DELETE FROM chunks WHERE id IN ({})",
                placeholders.join(",")
            );
            let mut query = sqlx::query(&sql);
            for id in ids {
                query = query.bind(id);
            }
            deleted += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        tracing::debug!(deleted, "Batched chunk delete complete");
        Ok(deleted)
    }

    // ============ Counts ============

    pub async fn count_files(&self, project_id: i64) -> Result<i64, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE project_id = ?1")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    pub async fn count_symbols(&self, project_id: i64) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM symbols s JOIN files f ON s.file_id = f.id
             WHERE f.project_id = ?1",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn count_chunks(&self, project_id: i64) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks c JOIN files f ON c.file_id = f.id
             WHERE f.project_id = ?1",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Chunk counts grouped by chunk type, for status breakdowns.
    pub async fn chunks_by_type(
        &self,
        project_id: i64,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        Ok(sqlx::query_as(
            "SELECT c.chunk_type, COUNT(*) FROM chunks c
             JOIN files f ON c.file_id = f.id
             WHERE f.project_id = ?1
             GROUP BY c.chunk_type ORDER BY c.chunk_type",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Symbol counts grouped by kind, for status breakdowns.
    pub async fn symbols_by_kind(
        &self,
        project_id: i64,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        Ok(sqlx::query_as(
            "SELECT s.kind, COUNT(*) FROM symbols s
             JOIN files f ON s.file_id = f.id
             WHERE f.project_id = ?1
             GROUP BY s.kind ORDER BY s.kind",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn count_embeddings(&self, project_id: i64) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM embeddings e
             JOIN chunks c ON e.chunk_id = c.id
             JOIN files f ON c.file_id = f.id
             WHERE f.project_id = ?1",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?)
    }

    // ============ Row mapping helpers ============
    //
    // sqlx is built without its macro features (matching the rest of the
    // stack), so rows map by hand instead of FromRow derives.

    pub(crate) fn project_from_row(row: &sqlx::sqlite::SqliteRow) -> ProjectRecord {
        ProjectRecord {
            id: row.get("id"),
            root_path: row.get("root_path"),
            module_name: row.get("module_name"),
            language_version: row.get("language_version"),
            total_files: row.get("total_files"),
            total_chunks: row.get("total_chunks"),
            index_version: row.get("index_version"),
            last_indexed_at: row.get("last_indexed_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    pub(crate) fn file_from_row(row: &sqlx::sqlite::SqliteRow) -> FileRecord {
        FileRecord {
            id: row.get("id"),
            project_id: row.get("project_id"),
            rel_path: row.get("rel_path"),
            package_name: row.get("package_name"),
            content_hash: row.get("content_hash"),
            mod_time: row.get("mod_time"),
            size_bytes: row.get("size_bytes"),
            parse_error: row.get("parse_error"),
            last_indexed_at: row.get("last_indexed_at"),
        }
    }

    pub(crate) fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> ChunkRecord {
        ChunkRecord {
            id: row.get("id"),
            file_id: row.get("file_id"),
            symbol_id: row.get("symbol_id"),
            content: row.get("content"),
            content_hash: row.get("content_hash"),
            token_count: row.get("token_count"),
            start_line: row.get("start_line"),
            end_line: row.get("end_line"),
            context_before: row.get("context_before"),
            context_after: row.get("context_after"),
            chunk_type: row.get("chunk_type"),
        }
    }

    pub(crate) fn import_from_row(row: &sqlx::sqlite::SqliteRow) -> ImportRecord {
        ImportRecord {
            id: row.get("id"),
            file_id: row.get("file_id"),
            import_path: row.get("import_path"),
            alias: row.get("alias"),
        }
    }

    pub(crate) fn symbol_from_row(row: &sqlx::sqlite::SqliteRow) -> SymbolRecord {
        use crate::parser::PatternFlags;
        SymbolRecord {
            id: row.get("id"),
            file_id: row.get("file_id"),
            name: row.get("name"),
            kind: row.get("kind"),
            package_name: row.get("package_name"),
            signature: row.get("signature"),
            doc: row.get("doc"),
            scope: row.get("scope"),
            receiver: row.get("receiver"),
            start_line: row.get("start_line"),
            start_col: row.get("start_col"),
            end_line: row.get("end_line"),
            end_col: row.get("end_col"),
            patterns: PatternFlags {
                aggregate: row.get::<i64, _>("is_aggregate") != 0,
                entity: row.get::<i64, _>("is_entity") != 0,
                value_object: row.get::<i64, _>("is_value_object") != 0,
                repository: row.get::<i64, _>("is_repository") != 0,
                service: row.get::<i64, _>("is_service") != 0,
                command: row.get::<i64, _>("is_command") != 0,
                query: row.get::<i64, _>("is_query") != 0,
                handler: row.get::<i64, _>("is_handler") != 0,
            },
        }
    }
}
