//! Vector search backends.
//!
//! Two implementations of the same capability, chosen when the store is
//! constructed and observable at runtime via [`VectorBackend::name`]:
//!
//! - [`SimdBackend`] (default) delegates distance computation to simsimd's
//!   native SIMD kernels over blobs fetched by one filter-joined statement
//!   against the indexed embeddings table.
//! - [`ScalarBackend`] is the portable fallback: the same scan with a
//!   pure-Rust f64-accumulated cosine.
//!
//! Both must return the same candidate set for the same query; ordering may
//! differ only within floating-point ties. Tests cross-validate them.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::types::{ScoredChunk, SearchFilters, StoreError};
use crate::vector::{cosine_similarity, decode_vector, normalize_similarity, vector_view};

/// Which vector backend to construct a store with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorBackendKind {
    /// simsimd SIMD kernels (the optimized path).
    #[default]
    Simd,
    /// Pure-Rust linear scan (the fallback path).
    Scalar,
}

impl VectorBackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            VectorBackendKind::Simd => "simd",
            VectorBackendKind::Scalar => "scalar",
        }
    }

    pub(crate) fn build(&self) -> Box<dyn VectorBackend> {
        match self {
            VectorBackendKind::Simd => Box::new(SimdBackend),
            VectorBackendKind::Scalar => Box::new(ScalarBackend),
        }
    }
}

/// Capability trait for vector similarity search.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Backend identifier for logs, status, and cross-validation tests.
    fn name(&self) -> &'static str;

    /// Top-`limit` chunks for `query` under `filters`, scored by normalized
    /// cosine in [0, 1], sorted descending.
    async fn search(
        &self,
        pool: &SqlitePool,
        project_id: i64,
        query: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, StoreError>;
}

// ============ Shared filter SQL ============

/// Filter fragments shared by the vector scan and text search statements.
/// `alias` conventions: `c` = chunks, `f` = files, `s` = symbols.
pub(crate) struct FilterSql {
    pub join: &'static str,
    pub clauses: Vec<String>,
    pub binds: Vec<String>,
}

/// Build filter joins and WHERE fragments, with positional parameters
/// starting at `first_param`. Pattern-flag columns are interpolated from
/// the validated names in [`crate::parser::PatternFlags::NAMES`], never
/// from raw input.
pub(crate) fn filter_sql(filters: &SearchFilters, first_param: usize) -> FilterSql {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    let mut param = first_param;

    let join = if filters.needs_symbol_join() {
        "JOIN symbols s ON c.symbol_id = s.id"
    } else {
        ""
    };

    if !filters.symbol_kinds.is_empty() {
        let placeholders: Vec<String> = (0..filters.symbol_kinds.len())
            .map(|i| format!("?{}", param + i))
            .collect();
        param += filters.symbol_kinds.len();
        clauses.push(format!("s.kind IN ({})", placeholders.join(",")));
        binds.extend(filters.symbol_kinds.iter().cloned());
    }

    if !filters.ddd_patterns.is_empty() {
        let flags: Vec<String> = filters
            .ddd_patterns
            .iter()
            .map(|name| format!("s.is_{name} = 1"))
            .collect();
        clauses.push(format!("({})", flags.join(" OR ")));
    }

    if !filters.packages.is_empty() {
        let placeholders: Vec<String> = (0..filters.packages.len())
            .map(|i| format!("?{}", param + i))
            .collect();
        clauses.push(format!("f.package_name IN ({})", placeholders.join(",")));
        binds.extend(filters.packages.iter().cloned());
    }

    FilterSql { join, clauses, binds }
}

/// Compile the optional file glob, surfacing invalid patterns as filter
/// errors (filters are validated upstream; this is the backstop).
pub(crate) fn compile_glob(
    filters: &SearchFilters,
) -> Result<Option<globset::GlobMatcher>, StoreError> {
    match &filters.file_glob {
        None => Ok(None),
        Some(pattern) => globset::Glob::new(pattern)
            .map(|g| Some(g.compile_matcher()))
            .map_err(|e| StoreError::InvalidFilter(format!("invalid file glob '{pattern}': {e}"))),
    }
}

// ============ Bounded top-k heap ============

/// Wrapper giving f64 a total order for heap use (NaN sorts low; scores
/// are checked finite before insertion anyway).
#[derive(Clone, Copy, PartialEq)]
struct OrderedScore(f64);

impl Eq for OrderedScore {}

impl PartialOrd for OrderedScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedScore {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Min-heap of the best `capacity` results seen so far: O(log k) insertion,
/// O(k) memory, O(k log k) drain, O(n log k) for the whole scan.
pub(crate) struct TopK {
    heap: BinaryHeap<Reverse<(OrderedScore, i64)>>,
    capacity: usize,
}

impl TopK {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, chunk_id: i64, score: f64) {
        if !score.is_finite() || self.capacity == 0 {
            return;
        }
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse((OrderedScore(score), chunk_id)));
            return;
        }
        // Strictly-greater keeps the first-seen item on ties, so equal
        // scores don't churn with scan order.
        if let Some(Reverse((OrderedScore(min), _))) = self.heap.peek() {
            if score > *min {
                self.heap.pop();
                self.heap.push(Reverse((OrderedScore(score), chunk_id)));
            }
        }
    }

    /// Drain into a Vec sorted by score descending, ties by chunk id.
    pub fn into_sorted_vec(self) -> Vec<ScoredChunk> {
        let mut results: Vec<ScoredChunk> = self
            .heap
            .into_iter()
            .map(|Reverse((OrderedScore(score), chunk_id))| ScoredChunk { chunk_id, score })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results
    }
}

// ============ Shared scan ============

/// Embeddings are scanned in id-cursor batches so memory stays bounded by
/// the batch, not the project.
const SCAN_BATCH: i64 = 5000;

/// Linear scan over a project's embeddings with a pluggable similarity
/// kernel. `similarity` returns raw cosine in [-1, 1] or `None` to skip a
/// corrupt/mismatched row.
async fn scan_embeddings(
    pool: &SqlitePool,
    project_id: i64,
    limit: usize,
    filters: &SearchFilters,
    similarity: impl Fn(&[u8]) -> Option<f64>,
) -> Result<Vec<ScoredChunk>, StoreError> {
    let glob = compile_glob(filters)?;
    // ?1 = project_id, ?2 = cursor, ?3 = batch limit
    let filter = filter_sql(filters, 4);

    let mut sql = format!(
        "SELECT e.id, e.chunk_id, e.vector, f.rel_path
         FROM embeddings e
         JOIN chunks c ON e.chunk_id = c.id
         JOIN files f ON c.file_id = f.id
         {}
         WHERE f.project_id = ?1 AND e.id > ?2",
        filter.join
    );
    for clause in &filter.clauses {
        sql.push_str(" AND ");
        sql.push_str(clause);
    }
    sql.push_str(" ORDER BY e.id ASC LIMIT ?3");

    let mut top = TopK::new(limit);
    let mut cursor = 0i64;
    loop {
        let mut query = sqlx::query(&sql).bind(project_id).bind(cursor).bind(SCAN_BATCH);
        for bind in &filter.binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(pool).await?;
        let batch_len = rows.len();

        for row in rows {
            let embedding_id: i64 = row.get(0);
            cursor = cursor.max(embedding_id);
            if let Some(matcher) = &glob {
                let rel_path: &str = row.get(3);
                if !matcher.is_match(rel_path) {
                    continue;
                }
            }
            let blob: &[u8] = row.get(2);
            let Some(cosine) = similarity(blob) else {
                continue;
            };
            let score = normalize_similarity(cosine);
            if score < filters.min_relevance {
                continue;
            }
            top.push(row.get(1), score);
        }

        if batch_len < SCAN_BATCH as usize {
            break;
        }
    }

    Ok(top.into_sorted_vec())
}

// ============ Backends ============

/// Optimized backend: simsimd SIMD distance kernels.
pub struct SimdBackend;

#[async_trait]
impl VectorBackend for SimdBackend {
    fn name(&self) -> &'static str {
        "simd"
    }

    async fn search(
        &self,
        pool: &SqlitePool,
        project_id: i64,
        query: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        use simsimd::SpatialSimilarity;

        let query_norm_sq = f32::dot(query, query)
            .unwrap_or_else(|| query.iter().map(|&x| (x as f64) * (x as f64)).sum());
        let query = query.to_vec();

        scan_embeddings(pool, project_id, limit, filters, move |blob| {
            let vector = vector_view(blob)?;
            let v = vector.as_ref();
            if v.len() != query.len() {
                return None;
            }
            let dot = f32::dot(&query, v).unwrap_or_else(|| {
                // simsimd returns None on unsupported architectures
                query
                    .iter()
                    .zip(v)
                    .map(|(&x, &y)| (x as f64) * (y as f64))
                    .sum()
            });
            let v_norm_sq = f32::dot(v, v)
                .unwrap_or_else(|| v.iter().map(|&x| (x as f64) * (x as f64)).sum());
            let denom = (query_norm_sq * v_norm_sq).sqrt();
            if denom == 0.0 {
                return Some(0.0);
            }
            let cosine = dot / denom;
            cosine.is_finite().then_some(cosine)
        })
        .await
    }
}

/// Fallback backend: pure-Rust cosine over decoded blobs.
pub struct ScalarBackend;

#[async_trait]
impl VectorBackend for ScalarBackend {
    fn name(&self) -> &'static str {
        "scalar"
    }

    async fn search(
        &self,
        pool: &SqlitePool,
        project_id: i64,
        query: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let query = query.to_vec();
        scan_embeddings(pool, project_id, limit, filters, move |blob| {
            let vector = decode_vector(blob)?;
            if vector.len() != query.len() {
                return None;
            }
            Some(cosine_similarity(&query, &vector))
        })
        .await
    }
}
