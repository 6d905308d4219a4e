//! Retrieval primitives and hydration accessors.
//!
//! `search_vector` dispatches to the configured backend; `search_text` runs
//! sanitized BM25 over the chunk FTS mirror. Both apply the same filter
//! joins so hybrid fusion upstream sees comparable candidate pools.

use sqlx::Row;

use super::backend::{compile_glob, filter_sql};
use super::types::{
    ChunkRecord, EmbeddingRecord, FileRecord, ImportRecord, ScoredChunk, SearchFilters,
    StoreError, SymbolRecord,
};
use super::SqliteStore;
use crate::fts::sanitize_fts_query;
use crate::vector::decode_vector;

impl SqliteStore {
    /// Vector similarity search: top-`limit` chunks by normalized cosine,
    /// descending. Which implementation runs is a construction-time choice;
    /// see [`SqliteStore::backend_name`].
    pub async fn search_vector(
        &self,
        project_id: i64,
        query: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        filters.validate()?;
        self.backend()
            .search(&self.pool, project_id, query, limit, filters)
            .await
    }

    /// Full-text search over chunk content: top-`limit` chunks by BM25.
    ///
    /// Query text is sanitized before it reaches the FTS engine; an input
    /// that sanitizes to nothing returns no results rather than an error.
    /// Scores are `-bm25(...)` so higher is better, consistent with every
    /// other ranking in the crate.
    pub async fn search_text(
        &self,
        project_id: i64,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        filters.validate()?;
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            tracing::debug!(original = %query, "Query sanitized to empty, no FTS results");
            return Ok(Vec::new());
        }
        let glob = compile_glob(filters)?;

        // ?1 = match expression, ?2 = project, ?3 = limit
        let filter = filter_sql(filters, 4);
        let mut sql = format!(
            "SELECT c.id, -bm25(chunks_fts) AS score, f.rel_path
             FROM chunks_fts
             JOIN chunks c ON chunks_fts.rowid = c.id
             JOIN files f ON c.file_id = f.id
             {}
             WHERE chunks_fts MATCH ?1 AND f.project_id = ?2",
            filter.join
        );
        for clause in &filter.clauses {
            sql.push_str(" AND ");
            sql.push_str(clause);
        }
        // Over-fetch when a glob is set: the glob prunes in-process below
        sql.push_str(" ORDER BY bm25(chunks_fts) LIMIT ?3");
        let fetch_limit = if glob.is_some() { limit * 4 } else { limit };

        let mut query_builder = sqlx::query(&sql)
            .bind(&sanitized)
            .bind(project_id)
            .bind(fetch_limit as i64);
        for bind in &filter.binds {
            query_builder = query_builder.bind(bind);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;

        let mut results = Vec::with_capacity(rows.len().min(limit));
        for row in rows {
            if let Some(matcher) = &glob {
                let rel_path: &str = row.get(2);
                if !matcher.is_match(rel_path) {
                    continue;
                }
            }
            results.push(ScoredChunk {
                chunk_id: row.get(0),
                score: row.get::<f64, _>(1),
            });
            if results.len() == limit {
                break;
            }
        }
        Ok(results)
    }

    /// Full-text search over symbol names/signatures/docs. Returns symbol
    /// ids with BM25 scores (negated, higher is better).
    ///
    /// Each sanitized token becomes a prefix term, so `parse` also matches
    /// a `ParseConfig` symbol (tokenized as one `parseconfig` token).
    pub async fn search_symbols(
        &self,
        project_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        // Sanitized tokens contain no FTS metacharacters, so appending the
        // prefix operator is safe.
        let prefix_query = sanitized
            .split(' ')
            .map(|token| format!("{token}*"))
            .collect::<Vec<_>>()
            .join(" ");

        let rows: Vec<(i64, f64)> = sqlx::query_as(
            "SELECT s.id, -bm25(symbols_fts) AS score
             FROM symbols_fts
             JOIN symbols s ON symbols_fts.rowid = s.id
             JOIN files f ON s.file_id = f.id
             WHERE symbols_fts MATCH ?1 AND f.project_id = ?2
             ORDER BY bm25(symbols_fts) LIMIT ?3",
        )
        .bind(&prefix_query)
        .bind(project_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ============ Hydration accessors ============

    pub async fn get_chunk(&self, chunk_id: i64) -> Result<ChunkRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?1")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("chunk", chunk_id))?;
        Ok(Self::chunk_from_row(&row))
    }

    pub async fn get_file(&self, file_id: i64) -> Result<FileRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?1")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("file", file_id))?;
        Ok(Self::file_from_row(&row))
    }

    pub async fn get_symbol(&self, symbol_id: i64) -> Result<SymbolRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM symbols WHERE id = ?1")
            .bind(symbol_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("symbol", symbol_id))?;
        Ok(Self::symbol_from_row(&row))
    }

    /// All chunks of one file, ordered by position.
    pub async fn list_chunks_for_file(
        &self,
        file_id: i64,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM chunks WHERE file_id = ?1 ORDER BY start_line, end_line")
                .bind(file_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(Self::chunk_from_row).collect())
    }

    /// All symbols of one file, ordered by position.
    pub async fn list_symbols_for_file(
        &self,
        file_id: i64,
    ) -> Result<Vec<SymbolRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM symbols WHERE file_id = ?1 ORDER BY start_line, start_col",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::symbol_from_row).collect())
    }

    /// All imports of one file.
    pub async fn list_imports_for_file(
        &self,
        file_id: i64,
    ) -> Result<Vec<ImportRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM imports WHERE file_id = ?1 ORDER BY id")
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::import_from_row).collect())
    }

    /// The stored embedding for a chunk, decoded, if present.
    pub async fn get_embedding_for_chunk(
        &self,
        chunk_id: i64,
    ) -> Result<Option<EmbeddingRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, chunk_id, vector, dimension, provider, model
             FROM embeddings WHERE chunk_id = ?1",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            let blob: Vec<u8> = row.get(2);
            let vector = decode_vector(&blob)?;
            Some(EmbeddingRecord {
                id: row.get(0),
                chunk_id: row.get(1),
                vector,
                dimension: row.get(3),
                provider: row.get(4),
                model: row.get(5),
            })
        }))
    }

    /// Chunk ids in a project that have no embedding row. Used by tests and
    /// by maintenance sweeps to verify the orphan invariant.
    pub async fn list_unembedded_chunks(&self, project_id: i64) -> Result<Vec<i64>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT c.id FROM chunks c
             JOIN files f ON c.file_id = f.id
             LEFT JOIN embeddings e ON e.chunk_id = c.id
             WHERE f.project_id = ?1 AND e.id IS NULL
             ORDER BY c.id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
