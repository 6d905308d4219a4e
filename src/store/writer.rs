//! Transactional write handle.
//!
//! [`StoreTx`] carries every mutating operation an indexing batch needs;
//! the read-only store does not expose them. One batch = one transaction:
//! a failure on any row rolls the whole batch back. Dropping the handle
//! without `commit` rolls back.

use sqlx::Sqlite;

use super::types::{NewChunk, NewFile, NewImport, NewSymbol, StoreError};

/// Write handle over one open transaction.
pub struct StoreTx<'a> {
    tx: sqlx::Transaction<'a, Sqlite>,
}

impl<'a> StoreTx<'a> {
    pub(crate) fn new(tx: sqlx::Transaction<'a, Sqlite>) -> Self {
        Self { tx }
    }

    /// Commit the transaction.
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Roll the transaction back explicitly. Equivalent to dropping the
    /// handle, but makes the intent visible at call sites.
    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }

    /// Insert or update a file row keyed on `(project_id, rel_path)`.
    ///
    /// On conflict the existing row is updated in place, so the file id is
    /// stable across reindexes of changed content. Returns the row id.
    pub async fn upsert_file(&mut self, file: &NewFile) -> Result<i64, StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO files
                (project_id, rel_path, package_name, content_hash, mod_time,
                 size_bytes, parse_error, last_indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(project_id, rel_path) DO UPDATE SET
                package_name = excluded.package_name,
                content_hash = excluded.content_hash,
                mod_time = excluded.mod_time,
                size_bytes = excluded.size_bytes,
                parse_error = excluded.parse_error,
                last_indexed_at = excluded.last_indexed_at
             RETURNING id",
        )
        .bind(file.project_id)
        .bind(&file.rel_path)
        .bind(&file.package_name)
        .bind(file.content_hash.as_slice())
        .bind(&file.mod_time)
        .bind(file.size_bytes)
        .bind(&file.parse_error)
        .bind(&now)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    /// Insert or update a symbol keyed on
    /// `(file_id, name, start_line, start_col)`. Returns the row id.
    pub async fn upsert_symbol(&mut self, symbol: &NewSymbol) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO symbols
                (file_id, name, kind, package_name, signature, doc, scope, receiver,
                 start_line, start_col, end_line, end_col,
                 is_aggregate, is_entity, is_value_object, is_repository,
                 is_service, is_command, is_query, is_handler)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                     ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
             ON CONFLICT(file_id, name, start_line, start_col) DO UPDATE SET
                kind = excluded.kind,
                package_name = excluded.package_name,
                signature = excluded.signature,
                doc = excluded.doc,
                scope = excluded.scope,
                receiver = excluded.receiver,
                end_line = excluded.end_line,
                end_col = excluded.end_col,
                is_aggregate = excluded.is_aggregate,
                is_entity = excluded.is_entity,
                is_value_object = excluded.is_value_object,
                is_repository = excluded.is_repository,
                is_service = excluded.is_service,
                is_command = excluded.is_command,
                is_query = excluded.is_query,
                is_handler = excluded.is_handler
             RETURNING id",
        )
        .bind(symbol.file_id)
        .bind(&symbol.name)
        .bind(&symbol.kind)
        .bind(&symbol.package_name)
        .bind(&symbol.signature)
        .bind(&symbol.doc)
        .bind(&symbol.scope)
        .bind(&symbol.receiver)
        .bind(symbol.start_line)
        .bind(symbol.start_col)
        .bind(symbol.end_line)
        .bind(symbol.end_col)
        .bind(symbol.patterns.aggregate as i64)
        .bind(symbol.patterns.entity as i64)
        .bind(symbol.patterns.value_object as i64)
        .bind(symbol.patterns.repository as i64)
        .bind(symbol.patterns.service as i64)
        .bind(symbol.patterns.command as i64)
        .bind(symbol.patterns.query as i64)
        .bind(symbol.patterns.handler as i64)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    /// Insert or update a chunk keyed on `(file_id, start_line, end_line)`.
    /// Returns the row id. The FTS mirror follows via triggers.
    pub async fn upsert_chunk(&mut self, chunk: &NewChunk) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO chunks
                (file_id, symbol_id, content, content_hash, token_count,
                 start_line, end_line, context_before, context_after, chunk_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(file_id, start_line, end_line) DO UPDATE SET
                symbol_id = excluded.symbol_id,
                content = excluded.content,
                content_hash = excluded.content_hash,
                token_count = excluded.token_count,
                context_before = excluded.context_before,
                context_after = excluded.context_after,
                chunk_type = excluded.chunk_type
             RETURNING id",
        )
        .bind(chunk.file_id)
        .bind(chunk.symbol_id)
        .bind(&chunk.content)
        .bind(&chunk.content_hash)
        .bind(chunk.token_count)
        .bind(chunk.start_line)
        .bind(chunk.end_line)
        .bind(&chunk.context_before)
        .bind(&chunk.context_after)
        .bind(&chunk.chunk_type)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    /// Insert or update an import keyed on `(file_id, import_path, alias)`.
    /// Returns the row id.
    pub async fn upsert_import(&mut self, import: &NewImport) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO imports (file_id, import_path, alias)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(file_id, import_path, alias) DO UPDATE SET
                alias = excluded.alias
             RETURNING id",
        )
        .bind(import.file_id)
        .bind(&import.import_path)
        .bind(&import.alias)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    /// Delete a file row; symbols, chunks, imports and embeddings cascade.
    /// This is the force-reindex path; the replacement row gets a new id.
    pub async fn delete_file(&mut self, file_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM files WHERE id = ?1")
            .bind(file_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Delete a file's children (chunks, symbols, imports; embeddings
    /// cascade from chunks) while keeping the file row and its id. This is
    /// the changed-content path.
    pub async fn delete_file_children(&mut self, file_id: i64) -> Result<(), StoreError> {
        // Chunks first: their symbol_id references symbols
        sqlx::query("DELETE FROM chunks WHERE file_id = ?1")
            .bind(file_id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM symbols WHERE file_id = ?1")
            .bind(file_id)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM imports WHERE file_id = ?1")
            .bind(file_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Delete file rows for paths that vanished from disk. Returns the
    /// number removed.
    pub async fn delete_files_not_in(
        &mut self,
        project_id: i64,
        keep_rel_paths: &[String],
    ) -> Result<u64, StoreError> {
        // An empty keep list means the walk found nothing; drop every file.
        if keep_rel_paths.is_empty() {
            let res = sqlx::query("DELETE FROM files WHERE project_id = ?1")
                .bind(project_id)
                .execute(&mut *self.tx)
                .await?;
            return Ok(res.rows_affected());
        }

        const BATCH: usize = 400;
        // Collect ids to delete by diffing in batches; SQLite caps bind
        // parameters per statement.
        let mut keep = std::collections::HashSet::with_capacity(keep_rel_paths.len());
        keep.extend(keep_rel_paths.iter().map(String::as_str));

        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, rel_path FROM files WHERE project_id = ?1")
                .bind(project_id)
                .fetch_all(&mut *self.tx)
                .await?;
        let doomed: Vec<i64> = rows
            .into_iter()
            .filter(|(_, path)| !keep.contains(path.as_str()))
            .map(|(id, _)| id)
            .collect();

        let mut deleted = 0u64;
        for ids in doomed.chunks(BATCH) {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!("DELETE FROM files WHERE id IN ({})", placeholders.join(","));
            let mut query = sqlx::query(&sql);
            for id in ids {
                query = query.bind(id);
            }
            deleted += query.execute(&mut *self.tx).await?.rows_affected();
        }
        Ok(deleted)
    }
}
