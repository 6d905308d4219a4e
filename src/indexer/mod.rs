//! Incremental indexing pipeline.
//!
//! One run: acquire the exclusive lock, resolve the project row, discover
//! source files, partition into batches, and dispatch batches onto a scoped
//! task group. Inside a batch, file reading/hashing/parsing/chunking runs
//! concurrently under a counting semaphore; the staged results are applied
//! to a single transaction, committed, embedded, and reconciled. Change
//! detection keys on the SHA-256 of raw bytes; mod times are stored for
//! display but never compared.
//!
//! Failure policy: one file's parse or store error is recorded and the rest
//! of the run proceeds; a transaction failure aborts its batch only;
//! embedding failures surface through orphan reconciliation and statistics.

mod stats;
mod walk;

pub use stats::IndexStats;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::chunker::{ChunkData, Chunker};
use crate::embedder::{validate_batch, Embedder};
use crate::lock::IndexLock;
use crate::parser::{ImportDecl, SourceParser, SymbolInfo};
use crate::store::{
    NewChunk, NewEmbedding, NewFile, NewImport, NewSymbol, SqliteStore, StoreError, StoreTx,
    CONTENT_HASH_LEN,
};
use stats::Counters;

#[derive(Error, Debug)]
pub enum IndexError {
    /// Another run holds this indexer's lock. Reported immediately; callers
    /// retry on their own schedule.
    #[error("indexing already in progress")]
    InProgress,
    #[error("project root is not usable: {0}")]
    InvalidRoot(String),
    #[error("indexing cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Options for one indexing run. Non-positive numeric values fall back to
/// their defaults at the start of the run.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Concurrency bound for batch dispatch and per-file processing.
    pub workers: usize,
    /// Files per transaction batch.
    pub batch_size: usize,
    /// Chunks per embedding request.
    pub embedding_batch: usize,
    /// Index `*_test.*` files.
    pub include_tests: bool,
    /// Index the top-level `vendor/` directory.
    pub include_vendor: bool,
    /// Generate embeddings for new chunks.
    pub generate_embeddings: bool,
    /// Replace every file row instead of skipping unchanged content.
    pub force_reindex: bool,
    /// Deadline for one embedding request.
    pub embed_timeout: Duration,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: 20,
            embedding_batch: 30,
            include_tests: true,
            include_vendor: false,
            generate_embeddings: true,
            force_reindex: false,
            embed_timeout: Duration::from_secs(60),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

impl IndexOptions {
    /// Replace non-positive numerics with defaults.
    fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.workers == 0 {
            self.workers = defaults.workers;
        }
        if self.batch_size == 0 {
            self.batch_size = defaults.batch_size;
        }
        if self.embedding_batch == 0 {
            self.embedding_batch = defaults.embedding_batch;
        }
        if self.embed_timeout.is_zero() {
            self.embed_timeout = defaults.embed_timeout;
        }
        self
    }
}

/// What the change decision concluded for one staged file.
#[derive(Debug, Clone, Copy)]
enum ChangeAction {
    /// No existing row; plain insert.
    Insert,
    /// Content changed; keep the file row (and its id), rebuild children.
    Rebuild { file_id: i64 },
    /// Force path: delete the row (cascades) and insert a fresh one.
    Replace { file_id: i64 },
}

/// A file that passed the change decision, fully parsed and chunked,
/// waiting for the batch transaction.
struct StagedFile {
    rel_path: String,
    action: ChangeAction,
    package_name: String,
    content_hash: [u8; CONTENT_HASH_LEN],
    mod_time: Option<String>,
    size_bytes: i64,
    parse_error: Option<String>,
    symbols: Vec<SymbolInfo>,
    imports: Vec<ImportDecl>,
    chunks: Vec<ChunkData>,
}

/// Everything a batch task needs, shared by Arc.
struct BatchCtx {
    store: Arc<SqliteStore>,
    parser: Arc<dyn SourceParser>,
    chunker: Arc<dyn Chunker>,
    embedder: Option<Arc<dyn Embedder>>,
    project_id: i64,
    root: PathBuf,
    options: IndexOptions,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    embed_enabled: bool,
}

/// The indexing pipeline. Holds the store capability, the external
/// collaborators, and this instance's exclusive lock.
pub struct Indexer {
    store: Arc<SqliteStore>,
    parser: Arc<dyn SourceParser>,
    chunker: Arc<dyn Chunker>,
    embedder: Option<Arc<dyn Embedder>>,
    lock: Arc<IndexLock>,
}

impl Indexer {
    pub fn new(
        store: Arc<SqliteStore>,
        parser: Arc<dyn SourceParser>,
        chunker: Arc<dyn Chunker>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            store,
            parser,
            chunker,
            embedder,
            lock: Arc::new(IndexLock::new()),
        }
    }

    /// Index a project root. See [`Indexer::index_project_with_cancel`].
    pub async fn index_project(
        &self,
        root: &Path,
        options: IndexOptions,
    ) -> Result<IndexStats, IndexError> {
        self.index_project_with_cancel(root, options, CancellationToken::new())
            .await
    }

    /// Index a project root with external cancellation.
    ///
    /// Returns [`IndexError::InProgress`] without blocking when another run
    /// holds the lock. Cancellation aborts in-flight work at its next
    /// suspension point; already-committed batches persist.
    pub async fn index_project_with_cancel(
        &self,
        root: &Path,
        options: IndexOptions,
        cancel: CancellationToken,
    ) -> Result<IndexStats, IndexError> {
        let options = options.normalized();
        let Some(_guard) = self.lock.guard() else {
            return Err(IndexError::InProgress);
        };
        let started = Instant::now();

        let root = dunce::canonicalize(root)
            .map_err(|e| IndexError::InvalidRoot(format!("{}: {e}", root.display())))?;
        if !root.is_dir() {
            return Err(IndexError::InvalidRoot(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let root_str = root.to_string_lossy().replace('\\', "/");

        let project = match self.store.get_project_by_root(&root_str).await? {
            Some(project) => project,
            None => {
                let manifest = self.parser.manifest(&root).await.unwrap_or_default();
                self.store
                    .create_project(&root_str, &manifest.module_name, &manifest.language_version)
                    .await?
            }
        };

        let counters = Arc::new(Counters::new());

        // The embedding stage is disabled for the whole run when no provider
        // is configured or the provider fails its availability probe. The
        // degradation is explicit in error_messages, not silent.
        let mut embed_enabled = options.generate_embeddings;
        if embed_enabled {
            match &self.embedder {
                None => {
                    embed_enabled = false;
                    counters.record_error(
                        "embeddings requested but no provider is configured; \
                         indexing without embeddings",
                    );
                }
                Some(embedder) if !embedder.is_available().await => {
                    embed_enabled = false;
                    counters.record_error(
                        "embedding provider unavailable; indexing without embeddings",
                    );
                }
                Some(_) => {}
            }
        }

        let files = walk::discover_files(
            &root,
            self.parser.extensions(),
            options.include_tests,
            options.include_vendor,
        );

        tracing::info!(
            project_id = project.id,
            files = files.len(),
            workers = options.workers,
            batch_size = options.batch_size,
            embeddings = embed_enabled,
            force = options.force_reindex,
            "Indexing run starting"
        );

        let batch_permits = Arc::new(Semaphore::new(options.workers));
        let ctx = Arc::new(BatchCtx {
            store: Arc::clone(&self.store),
            parser: Arc::clone(&self.parser),
            chunker: Arc::clone(&self.chunker),
            embedder: self.embedder.clone(),
            project_id: project.id,
            root,
            options,
            counters: Arc::clone(&counters),
            cancel: cancel.clone(),
            embed_enabled,
        });

        let mut tasks: JoinSet<Result<(), IndexError>> = JoinSet::new();
        for batch in files.chunks(ctx.options.batch_size) {
            let ctx = Arc::clone(&ctx);
            let permits = Arc::clone(&batch_permits);
            let batch = batch.to_vec();
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| IndexError::Cancelled)?;
                run_batch(ctx, batch).await
            });
        }

        let mut cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(IndexError::Cancelled)) => cancelled = true,
                Ok(Err(e)) => counters.record_error(format!("batch failed: {e}")),
                Err(join_error) => {
                    counters.record_error(format!("batch task panicked: {join_error}"))
                }
            }
        }
        if cancelled {
            return Err(IndexError::Cancelled);
        }

        // Prune rows for files that vanished from disk. The keep set is the
        // discovered list (not the staged one), so files that merely failed
        // this run are untouched.
        match self.store.begin_tx().await {
            Ok(mut tx) => {
                match tx.delete_files_not_in(project.id, &files).await {
                    Ok(removed) => {
                        if let Err(e) = tx.commit().await {
                            counters.record_error(format!("stale file prune failed: {e}"));
                        } else if removed > 0 {
                            tracing::info!(removed, "Pruned files no longer on disk");
                        }
                    }
                    Err(e) => {
                        counters.record_error(format!("stale file prune failed: {e}"));
                        let _ = tx.rollback().await;
                    }
                }
            }
            Err(e) => counters.record_error(format!("stale file prune failed: {e}")),
        }

        self.store.update_project_totals(project.id).await?;

        let stats = counters.snapshot(started.elapsed());
        tracing::info!(project_id = project.id, %stats, "Indexing run complete");
        Ok(stats)
    }
}

/// Process one batch: stage files concurrently, apply them in one
/// transaction, then embed and reconcile.
async fn run_batch(ctx: Arc<BatchCtx>, files: Vec<String>) -> Result<(), IndexError> {
    if ctx.cancel.is_cancelled() {
        return Err(IndexError::Cancelled);
    }

    // Stage A: read + hash + decide + parse + chunk, bounded by this
    // batch's own file semaphore (each batch gets a full `workers`-sized
    // allowance; the outer batch permits are the second bound). Failures
    // are recorded per file and don't stop the batch.
    let file_permits = Arc::new(Semaphore::new(ctx.options.workers));
    let mut staging: JoinSet<Option<StagedFile>> = JoinSet::new();
    for rel_path in files {
        let ctx = Arc::clone(&ctx);
        let permit = Arc::clone(&file_permits)
            .acquire_owned()
            .await
            .map_err(|_| IndexError::Cancelled)?;
        staging.spawn(async move {
            let _permit = permit;
            stage_file(&ctx, rel_path).await
        });
    }

    let mut staged = Vec::new();
    while let Some(joined) = staging.join_next().await {
        match joined {
            Ok(Some(file)) => staged.push(file),
            Ok(None) => {}
            Err(join_error) => ctx
                .counters
                .record_error(format!("file task panicked: {join_error}")),
        }
    }
    if ctx.cancel.is_cancelled() {
        return Err(IndexError::Cancelled);
    }
    if staged.is_empty() {
        return Ok(());
    }
    // Completion order is nondeterministic; apply in path order.
    staged.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    // Stage B: one transaction for the whole batch. A failure on any row
    // rolls the batch back and fails only this batch.
    let mut tx = match ctx.store.begin_tx().await {
        Ok(tx) => tx,
        Err(e) => {
            ctx.counters
                .record_error(format!("batch transaction begin failed: {e}"));
            ctx.counters
                .add(&ctx.counters.files_failed, staged.len() as u64);
            return Ok(());
        }
    };

    let mut batch_chunks: Vec<(i64, String)> = Vec::new();
    let mut per_file: Vec<(u64, u64)> = Vec::with_capacity(staged.len());
    let mut apply_error: Option<StoreError> = None;
    for file in &staged {
        match apply_file(&mut tx, &ctx, file, &mut batch_chunks).await {
            Ok(counts) => per_file.push(counts),
            Err(e) => {
                apply_error = Some(e);
                break;
            }
        }
    }

    if let Some(e) = apply_error {
        ctx.counters.record_error(format!("batch write failed: {e}"));
        ctx.counters
            .add(&ctx.counters.files_failed, staged.len() as u64);
        let _ = tx.rollback().await;
        return Ok(());
    }
    if let Err(e) = tx.commit().await {
        ctx.counters
            .record_error(format!("batch commit failed: {e}"));
        ctx.counters
            .add(&ctx.counters.files_failed, staged.len() as u64);
        return Ok(());
    }

    // Chunks have their final ids now; counters reflect committed state only.
    ctx.counters
        .add(&ctx.counters.files_indexed, staged.len() as u64);
    for (symbols, chunks) in per_file {
        ctx.counters.add(&ctx.counters.symbols_extracted, symbols);
        ctx.counters.add(&ctx.counters.chunks_created, chunks);
    }

    // Stage C: embeddings, then orphan reconciliation in its own
    // transaction so a reconciliation failure can't revert index writes.
    if ctx.embed_enabled && !batch_chunks.is_empty() {
        embed_and_reconcile(&ctx, batch_chunks).await;
    }

    if ctx.cancel.is_cancelled() {
        return Err(IndexError::Cancelled);
    }
    Ok(())
}

/// Stage one file. Returns `None` for skipped and failed files; counters
/// and error messages record which.
async fn stage_file(ctx: &BatchCtx, rel_path: String) -> Option<StagedFile> {
    if ctx.cancel.is_cancelled() {
        return None;
    }
    let abs = ctx.root.join(&rel_path);

    let bytes = tokio::select! {
        result = tokio::fs::read(&abs) => match result {
            Ok(bytes) => bytes,
            Err(e) => {
                ctx.counters.add(&ctx.counters.files_failed, 1);
                ctx.counters.record_error(format!("{rel_path}: read failed: {e}"));
                return None;
            }
        },
        _ = ctx.cancel.cancelled() => return None,
    };

    let content_hash: [u8; CONTENT_HASH_LEN] = Sha256::digest(&bytes).into();
    let size_bytes = bytes.len() as i64;
    let mod_time = tokio::fs::metadata(&abs)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());

    // Change decision: the content hash is the sole authority.
    let existing = match ctx.store.get_file_by_path(ctx.project_id, &rel_path).await {
        Ok(existing) => existing,
        Err(e) => {
            ctx.counters.add(&ctx.counters.files_failed, 1);
            ctx.counters.record_error(format!("{rel_path}: lookup failed: {e}"));
            return None;
        }
    };
    let action = if ctx.options.force_reindex {
        match existing {
            Some(file) => ChangeAction::Replace { file_id: file.id },
            None => ChangeAction::Insert,
        }
    } else {
        match existing {
            None => ChangeAction::Insert,
            Some(file) if file.content_hash == content_hash => {
                ctx.counters.add(&ctx.counters.files_skipped, 1);
                return None;
            }
            Some(file) => ChangeAction::Rebuild { file_id: file.id },
        }
    };

    let parse = tokio::select! {
        result = ctx.parser.parse(&abs) => match result {
            Ok(parse) => parse,
            Err(e) => {
                ctx.counters.add(&ctx.counters.files_failed, 1);
                ctx.counters.record_error(format!("{rel_path}: {e}"));
                return None;
            }
        },
        _ = ctx.cancel.cancelled() => return None,
    };
    // Recoverable syntax errors don't fail the file; the first message is
    // persisted on the row and whatever was recovered gets indexed.
    let parse_error = parse.errors.first().map(|issue| issue.message.clone());
    if let Some(message) = &parse_error {
        tracing::debug!(file = %rel_path, error = %message, "Parse error recorded");
    }

    let chunks = tokio::select! {
        result = ctx.chunker.chunk(&abs, &parse) => match result {
            Ok(chunks) => chunks,
            Err(e) => {
                ctx.counters.add(&ctx.counters.files_failed, 1);
                ctx.counters.record_error(format!("{rel_path}: chunking failed: {e}"));
                return None;
            }
        },
        _ = ctx.cancel.cancelled() => return None,
    };

    Some(StagedFile {
        rel_path,
        action,
        package_name: parse.package_name.clone(),
        content_hash,
        mod_time,
        size_bytes,
        parse_error,
        symbols: parse.symbols,
        imports: parse.imports,
        chunks,
    })
}

/// Apply one staged file inside the batch transaction. Ordering within a
/// file: file row, then symbols and imports, then chunks. Returns
/// `(symbols, chunks)` written.
async fn apply_file(
    tx: &mut StoreTx<'_>,
    ctx: &BatchCtx,
    file: &StagedFile,
    batch_chunks: &mut Vec<(i64, String)>,
) -> Result<(u64, u64), StoreError> {
    match file.action {
        ChangeAction::Insert => {}
        ChangeAction::Rebuild { file_id } => tx.delete_file_children(file_id).await?,
        ChangeAction::Replace { file_id } => tx.delete_file(file_id).await?,
    }

    let file_id = tx
        .upsert_file(&NewFile {
            project_id: ctx.project_id,
            rel_path: file.rel_path.clone(),
            package_name: file.package_name.clone(),
            content_hash: file.content_hash,
            mod_time: file.mod_time.clone(),
            size_bytes: file.size_bytes,
            parse_error: file.parse_error.clone(),
        })
        .await?;

    let mut symbol_ids = Vec::with_capacity(file.symbols.len());
    for symbol in &file.symbols {
        let id = tx
            .upsert_symbol(&NewSymbol {
                file_id,
                name: symbol.name.clone(),
                kind: symbol.kind.to_string(),
                package_name: symbol.package_name.clone(),
                signature: symbol.signature.clone(),
                doc: symbol.doc.clone(),
                scope: symbol.scope.clone(),
                receiver: symbol.receiver.clone(),
                start_line: symbol.start_line as i64,
                start_col: symbol.start_col as i64,
                end_line: symbol.end_line as i64,
                end_col: symbol.end_col as i64,
                patterns: symbol.patterns,
            })
            .await?;
        symbol_ids.push(id);
    }

    for import in &file.imports {
        tx.upsert_import(&NewImport {
            file_id,
            import_path: import.path.clone(),
            alias: import.alias.clone(),
        })
        .await?;
    }

    for chunk in &file.chunks {
        // A chunk may only link to a symbol from its own file; resolution
        // via the staged index enforces that by construction.
        let symbol_id = chunk
            .symbol_index
            .and_then(|index| symbol_ids.get(index))
            .copied();
        let chunk_id = tx
            .upsert_chunk(&NewChunk {
                file_id,
                symbol_id,
                content: chunk.content.clone(),
                content_hash: chunk.content_hash.clone(),
                token_count: chunk.token_count as i64,
                start_line: chunk.start_line as i64,
                end_line: chunk.end_line as i64,
                context_before: chunk.context_before.clone(),
                context_after: chunk.context_after.clone(),
                chunk_type: chunk.kind.to_string(),
            })
            .await?;
        batch_chunks.push((chunk_id, chunk.content.clone()));
    }

    Ok((file.symbols.len() as u64, file.chunks.len() as u64))
}

/// Embed a batch's committed chunks in sub-batches, then delete every chunk
/// that didn't get an embedding. The results map defaults to false: a chunk
/// is only kept once its embedding row is stored.
async fn embed_and_reconcile(ctx: &BatchCtx, batch_chunks: Vec<(i64, String)>) {
    let Some(embedder) = ctx.embedder.as_ref() else {
        return;
    };
    let dimension = embedder.dimension();
    let mut results: HashMap<i64, bool> =
        batch_chunks.iter().map(|(id, _)| (*id, false)).collect();

    for sub_batch in batch_chunks.chunks(ctx.options.embedding_batch) {
        if ctx.cancel.is_cancelled() {
            break; // remaining chunks stay false and get reconciled away
        }
        let texts: Vec<String> = sub_batch.iter().map(|(_, text)| text.clone()).collect();

        let outcome = tokio::select! {
            result = tokio::time::timeout(
                ctx.options.embed_timeout,
                embedder.embed_batch(&texts),
            ) => result,
            _ = ctx.cancel.cancelled() => break,
        };

        let failed = |message: String| {
            ctx.counters
                .add(&ctx.counters.embeddings_failed, sub_batch.len() as u64);
            ctx.counters.record_error(message);
        };

        match outcome {
            Err(_elapsed) => failed(format!(
                "embedding batch timed out after {:?}",
                ctx.options.embed_timeout
            )),
            Ok(Err(e)) => failed(format!("embedding batch failed: {e}")),
            Ok(Ok(batch)) => match validate_batch(&batch, texts.len(), dimension) {
                Err(e) => failed(format!("embedding batch invalid: {e}")),
                Ok(()) => {
                    let rows: Vec<NewEmbedding> = sub_batch
                        .iter()
                        .zip(batch.vectors)
                        .map(|((chunk_id, _), vector)| NewEmbedding {
                            chunk_id: *chunk_id,
                            vector: vector.vector,
                            provider: vector.provider,
                            model: vector.model,
                        })
                        .collect();
                    match ctx.store.insert_embeddings(&rows).await {
                        Ok(stored) => {
                            ctx.counters
                                .add(&ctx.counters.embeddings_generated, stored as u64);
                            for (chunk_id, _) in sub_batch {
                                results.insert(*chunk_id, true);
                            }
                        }
                        Err(e) => failed(format!("embedding store failed: {e}")),
                    }
                }
            },
        }
    }

    // Orphan reconciliation: a persisted chunk either has its embedding or
    // is removed. Runs in its own transaction; failure is logged and left
    // for the next run to clean up.
    let orphans: Vec<i64> = results
        .iter()
        .filter(|(_, embedded)| !**embedded)
        .map(|(id, _)| *id)
        .collect();
    if orphans.is_empty() {
        return;
    }
    match ctx.store.delete_chunks_batch(&orphans).await {
        Ok(deleted) => {
            tracing::info!(deleted, "Removed chunks with failed embeddings");
        }
        Err(e) => {
            ctx.counters
                .record_error(format!("orphan reconciliation failed: {e}"));
        }
    }
}
