//! Hybrid search engine.
//!
//! Three modes over one index: `vector` (embed the query, cosine
//! candidates), `keyword` (sanitized BM25), and `hybrid` (both in parallel,
//! fused with reciprocal-rank fusion). Fused candidates are thresholded,
//! truncated, and hydrated into full results with their file and symbol
//! context.

mod cache;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedder::{validate_batch, Embedder, EmbedderError};
use crate::store::{ScoredChunk, SearchFilters, SqliteStore, StoreError};
use cache::ResultCache;

/// Default RRF constant. K=60 is the standard value from the original
/// paper; higher K flattens the impact of rank differences.
pub const DEFAULT_RRF_CONSTANT: f64 = 60.0;

/// Internal retrieval breadth multiplier for hybrid mode: each arm fetches
/// `2 * limit` candidates so fusion has something to disagree about.
const HYBRID_BREADTH: usize = 2;

/// Hard cap on the requested result count.
pub const MAX_LIMIT: usize = 100;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("invalid search request: {0}")]
    InvalidArgument(String),
    #[error("project {0} not found")]
    ProjectNotFound(i64),
    #[error(transparent)]
    Store(StoreError),
    #[error("query embedding failed: {0}")]
    Embedder(#[from] EmbedderError),
}

impl From<StoreError> for SearchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidFilter(message) => SearchError::InvalidArgument(message),
            other => SearchError::Store(other),
        }
    }
}

/// Retrieval mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Keyword,
    Hybrid,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SearchMode::Vector => "vector",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SearchMode {
    type Err = SearchError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" => Ok(SearchMode::Vector),
            "keyword" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(SearchError::InvalidArgument(format!(
                "unknown search mode '{other}' (expected vector, keyword, or hybrid)"
            ))),
        }
    }
}

/// One search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Requested result count, 1..=100.
    pub limit: usize,
    pub mode: SearchMode,
    pub project_id: i64,
    #[serde(default)]
    pub filters: SearchFilters,
    /// RRF constant for hybrid fusion; defaults to 60.
    #[serde(default)]
    pub rrf_constant: Option<f64>,
    /// Opt into the response cache.
    #[serde(default)]
    pub use_cache: bool,
}

impl SearchRequest {
    pub fn new(project_id: i64, query: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            query: query.into(),
            limit: 10,
            mode,
            project_id,
            filters: SearchFilters::default(),
            rrf_constant: None,
            use_cache: false,
        }
    }

    fn validate(&self) -> Result<(), SearchError> {
        if self.query.trim().is_empty() {
            return Err(SearchError::InvalidArgument("query must not be empty".into()));
        }
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(SearchError::InvalidArgument(format!(
                "limit must be in [1, {MAX_LIMIT}], got {}",
                self.limit
            )));
        }
        if let Some(k) = self.rrf_constant {
            if !(k.is_finite() && k > 0.0) {
                return Err(SearchError::InvalidArgument(format!(
                    "rrf_constant must be positive and finite, got {k}"
                )));
            }
        }
        self.filters.validate()?;
        Ok(())
    }

    /// Stable cache key over everything that affects the response.
    fn cache_key(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.project_id.hash(&mut hasher);
        self.query.hash(&mut hasher);
        self.mode.hash(&mut hasher);
        self.limit.hash(&mut hasher);
        self.rrf_constant
            .unwrap_or(DEFAULT_RRF_CONSTANT)
            .to_bits()
            .hash(&mut hasher);
        for kind in &self.filters.symbol_kinds {
            kind.hash(&mut hasher);
        }
        self.filters.file_glob.hash(&mut hasher);
        for pattern in &self.filters.ddd_patterns {
            pattern.hash(&mut hasher);
        }
        for package in &self.filters.packages {
            package.hash(&mut hasher);
        }
        self.filters.min_relevance.to_bits().hash(&mut hasher);
        hasher.finish()
    }
}

/// Symbol context on a hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSummary {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub signature: String,
    pub package_name: String,
}

/// File context on a hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: i64,
    pub rel_path: String,
    pub package_name: String,
}

/// One hydrated search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: i64,
    /// 1-based rank within this response.
    pub rank: usize,
    /// Normalized relevance in [0, 1], non-increasing down the list.
    pub relevance_score: f64,
    pub content: String,
    pub context_before: String,
    pub context_after: String,
    pub chunk_type: String,
    pub start_line: i64,
    pub end_line: i64,
    pub symbol: Option<SymbolSummary>,
    pub file: FileSummary,
}

/// A complete search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub mode: SearchMode,
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

/// A resolved symbol definition from [`Searcher::find_definitions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    pub symbol: SymbolSummary,
    pub file: FileSummary,
    pub start_line: i64,
    pub end_line: i64,
    /// Name-match quality: 1.0 exact, 0.9 prefix, 0.7 substring, 0.5 for
    /// other full-text matches (doc/signature).
    pub score: f64,
}

/// The search engine. Consumes the store as a shared capability; the
/// embedder is optional (keyword mode works without one).
pub struct Searcher {
    store: Arc<SqliteStore>,
    embedder: Option<Arc<dyn Embedder>>,
    cache: ResultCache,
}

impl Searcher {
    pub fn new(store: Arc<SqliteStore>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            store,
            embedder,
            cache: ResultCache::new(),
        }
    }

    /// Drop all cached responses. Call after indexing in-process so stale
    /// results can't outlive the data they came from.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    /// Execute one search request.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        request.validate()?;
        // Reject unknown projects before touching the cache so a stale id
        // can't serve cross-database results.
        match self.store.get_project(request.project_id).await {
            Ok(_) => {}
            Err(StoreError::NotFound { .. }) => {
                return Err(SearchError::ProjectNotFound(request.project_id))
            }
            Err(e) => return Err(e.into()),
        }

        let cache_key = request.cache_key();
        if request.use_cache {
            if let Some(cached) = self.cache.get(cache_key) {
                tracing::debug!(query = %request.query, "Search cache hit");
                return Ok(cached);
            }
        }

        let _span =
            tracing::info_span!("search", mode = %request.mode, limit = request.limit).entered();

        let candidates = match request.mode {
            SearchMode::Vector => self.vector_candidates(request, request.limit, true).await?,
            SearchMode::Keyword => {
                let raw = self.keyword_candidates(request, request.limit).await?;
                threshold_normalized(normalize_scores(raw), request.filters.min_relevance)
            }
            SearchMode::Hybrid => self.hybrid_candidates(request).await?,
        };

        let hits = self.hydrate(&candidates, request.limit).await?;
        let response = SearchResponse {
            query: request.query.clone(),
            mode: request.mode,
            total: hits.len(),
            hits,
        };
        if request.use_cache {
            self.cache.put(cache_key, response.clone());
        }
        Ok(response)
    }

    /// Resolve symbol definitions by name ("where is X defined?").
    ///
    /// Runs the symbol full-text index, then re-scores by name exactness so
    /// an exact match outranks a prefix match outranks a substring match.
    pub async fn find_definitions(
        &self,
        project_id: i64,
        name: &str,
        limit: usize,
    ) -> Result<Vec<Definition>, SearchError> {
        if name.trim().is_empty() {
            return Err(SearchError::InvalidArgument("name must not be empty".into()));
        }
        if limit == 0 || limit > MAX_LIMIT {
            return Err(SearchError::InvalidArgument(format!(
                "limit must be in [1, {MAX_LIMIT}], got {limit}"
            )));
        }

        // Over-fetch so exactness re-scoring has room to reorder.
        let candidates = self
            .store
            .search_symbols(project_id, name, limit.saturating_mul(3))
            .await?;
        let name_lower = name.to_lowercase();

        let mut definitions = Vec::with_capacity(candidates.len());
        for (symbol_id, _bm25) in candidates {
            let record = self.store.get_symbol(symbol_id).await?;
            let file = self.store.get_file(record.file_id).await?;
            let candidate_lower = record.name.to_lowercase();
            let score = if candidate_lower == name_lower {
                1.0
            } else if candidate_lower.starts_with(&name_lower) {
                0.9
            } else if candidate_lower.contains(&name_lower) {
                0.7
            } else {
                0.5
            };
            definitions.push(Definition {
                symbol: SymbolSummary {
                    id: record.id,
                    name: record.name,
                    kind: record.kind,
                    signature: record.signature,
                    package_name: record.package_name,
                },
                file: FileSummary {
                    id: file.id,
                    rel_path: file.rel_path,
                    package_name: file.package_name,
                },
                start_line: record.start_line,
                end_line: record.end_line,
                score,
            });
        }
        definitions.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.symbol.id.cmp(&b.symbol.id))
        });
        definitions.truncate(limit);
        Ok(definitions)
    }

    /// Vector arm: embed the query, then cosine search. When
    /// `apply_threshold` is false (hybrid), min_relevance is deferred to
    /// post-fusion.
    async fn vector_candidates(
        &self,
        request: &SearchRequest,
        breadth: usize,
        apply_threshold: bool,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            EmbedderError::Unavailable("no embedding provider configured".into())
        })?;
        let texts = [request.query.clone()];
        let batch = embedder.embed_batch(&texts).await?;
        validate_batch(&batch, 1, embedder.dimension())?;
        let query_vector = &batch.vectors[0].vector;

        let mut filters = request.filters.clone();
        if !apply_threshold {
            filters.min_relevance = 0.0;
        }
        Ok(self
            .store
            .search_vector(request.project_id, query_vector, breadth, &filters)
            .await?)
    }

    /// Keyword arm: sanitized BM25 candidates with raw (unbounded) scores.
    async fn keyword_candidates(
        &self,
        request: &SearchRequest,
        breadth: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        Ok(self
            .store
            .search_text(request.project_id, &request.query, breadth, &request.filters)
            .await?)
    }

    /// Hybrid: both arms in parallel at `2 * limit` breadth, RRF-fused,
    /// thresholded post-fusion, truncated to the requested limit.
    async fn hybrid_candidates(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let breadth = request.limit.saturating_mul(HYBRID_BREADTH).max(request.limit);
        let (dense, sparse) = tokio::join!(
            self.vector_candidates(request, breadth, false),
            self.keyword_candidates(request, breadth),
        );
        let dense = dense?;
        let sparse = sparse?;

        let k = request.rrf_constant.unwrap_or(DEFAULT_RRF_CONSTANT);
        let dense_ids: Vec<i64> = dense.iter().map(|c| c.chunk_id).collect();
        let sparse_ids: Vec<i64> = sparse.iter().map(|c| c.chunk_id).collect();
        let fused = rrf_fuse(&dense_ids, &sparse_ids, k, request.limit);

        Ok(threshold_normalized(
            normalize_scores(fused),
            request.filters.min_relevance,
        ))
    }

    /// Load chunk, file, and optional symbol context for each candidate.
    async fn hydrate(
        &self,
        candidates: &[ScoredChunk],
        limit: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let mut hits = Vec::with_capacity(candidates.len().min(limit));
        for candidate in candidates.iter().take(limit) {
            let chunk = match self.store.get_chunk(candidate.chunk_id).await {
                Ok(chunk) => chunk,
                Err(StoreError::NotFound { .. }) => {
                    // Deleted between ranking and hydration (concurrent
                    // reindex); drop it rather than failing the response.
                    tracing::debug!(chunk_id = candidate.chunk_id, "Candidate vanished, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let file = self.store.get_file(chunk.file_id).await?;
            let symbol = match chunk.symbol_id {
                Some(symbol_id) => {
                    let record = self.store.get_symbol(symbol_id).await?;
                    Some(SymbolSummary {
                        id: record.id,
                        name: record.name,
                        kind: record.kind,
                        signature: record.signature,
                        package_name: record.package_name,
                    })
                }
                None => None,
            };
            hits.push(SearchHit {
                chunk_id: chunk.id,
                rank: hits.len() + 1,
                relevance_score: candidate.score,
                content: chunk.content,
                context_before: chunk.context_before,
                context_after: chunk.context_after,
                chunk_type: chunk.chunk_type,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                symbol,
                file: FileSummary {
                    id: file.id,
                    rel_path: file.rel_path,
                    package_name: file.package_name,
                },
            });
        }
        Ok(hits)
    }
}

/// Reciprocal-rank fusion over two ranked id lists.
///
/// `score(c) = Σ_r 1 / (k + rank_r(c))` over the rankings that contain `c`,
/// ranks 1-based. Ties break toward the lower (better) best rank, then by
/// id for determinism. Sorting is the standard O(n log n) comparison sort.
pub fn rrf_fuse(dense: &[i64], sparse: &[i64], k: f64, limit: usize) -> Vec<ScoredChunk> {
    // (fused score, best rank seen) per chunk
    let mut scores: HashMap<i64, (f64, usize)> = HashMap::new();

    for ranking in [dense, sparse] {
        for (index, &chunk_id) in ranking.iter().enumerate() {
            let rank = index + 1;
            let entry = scores.entry(chunk_id).or_insert((0.0, usize::MAX));
            entry.0 += 1.0 / (k + rank as f64);
            entry.1 = entry.1.min(rank);
        }
    }

    let mut fused: Vec<(i64, f64, usize)> = scores
        .into_iter()
        .map(|(chunk_id, (score, best_rank))| (chunk_id, score, best_rank))
        .collect();
    fused.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| a.2.cmp(&b.2))
            .then_with(|| a.0.cmp(&b.0))
    });
    fused.truncate(limit);
    fused
        .into_iter()
        .map(|(chunk_id, score, _)| ScoredChunk { chunk_id, score })
        .collect()
}

/// Scale scores into [0, 1] by the observed maximum (order preserving).
/// Non-positive maxima collapse to zero scores rather than dividing by a
/// sign that would flip the ordering.
fn normalize_scores(mut candidates: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let max = candidates.iter().map(|c| c.score).fold(f64::MIN, f64::max);
    if max > 0.0 {
        for candidate in &mut candidates {
            candidate.score = (candidate.score / max).clamp(0.0, 1.0);
        }
    } else {
        for candidate in &mut candidates {
            candidate.score = 0.0;
        }
    }
    candidates
}

fn threshold_normalized(candidates: Vec<ScoredChunk>, min_relevance: f64) -> Vec<ScoredChunk> {
    if min_relevance <= 0.0 {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|c| c.score >= min_relevance)
        .collect()
}
