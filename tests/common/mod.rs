//! Common test fixtures and helpers.
//!
//! Usage in test files:
//! ```ignore
//! mod common;
//! use common::{MockEmbedder, MockParser, TestIndex};
//! ```
//!
//! The mock parser speaks a line-oriented toy language so pipeline tests
//! can exercise symbols, imports, packages, docs, and recoverable syntax
//! errors without a real AST parser:
//!
//! ```text
//! package auth
//! import "net/http"
//! import "db/sql" as sql
//! # doc line for the next symbol
//! fn Login(user, pass)
//! struct SessionRepository
//! method Session.Refresh()
//! !!!                       <- recoverable syntax error
//! ```

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use codeseek::chunker::{ChunkData, ChunkKind, Chunker, ChunkerError};
use codeseek::embedder::{Embedder, EmbedderError, EmbeddingBatch, EmbeddingVector};
use codeseek::parser::{
    ImportDecl, ModuleManifest, ParseIssue, ParseResult, ParserError, PatternFlags, SourceParser,
    SymbolInfo, SymbolKind,
};
use codeseek::store::{SqliteStore, VectorBackendKind};
use codeseek::{Indexer, Searcher};

/// Embedding dimension used by every mock provider.
pub const EMBED_DIM: usize = 16;

// ============ Store fixture ============

/// Temp-backed store with automatic cleanup.
pub struct TestStore {
    pub store: Arc<SqliteStore>,
    _dir: TempDir,
}

impl TestStore {
    pub async fn new() -> Self {
        Self::with_backend(VectorBackendKind::default()).await
    }

    pub async fn with_backend(kind: VectorBackendKind) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let store = SqliteStore::open_with_backend(&dir.path().join("index.db"), kind)
            .await
            .expect("open store");
        Self {
            store: Arc::new(store),
            _dir: dir,
        }
    }

    /// Path of the backing database (to open a second store on it).
    pub fn db_path(&self) -> PathBuf {
        self._dir.path().join("index.db")
    }
}

impl std::ops::Deref for TestStore {
    type Target = SqliteStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

// ============ Full pipeline fixture ============

/// Store + indexer + searcher over a temp project directory.
pub struct TestIndex {
    pub store: Arc<SqliteStore>,
    pub indexer: Indexer,
    pub searcher: Searcher,
    pub project_dir: TempDir,
    _db_dir: TempDir,
}

impl TestIndex {
    pub async fn new(embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self::with_parser(Arc::new(MockParser), embedder).await
    }

    pub async fn with_parser(
        parser: Arc<dyn SourceParser>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let db_dir = TempDir::new().expect("create db dir");
        let store = Arc::new(
            SqliteStore::open(&db_dir.path().join("index.db"))
                .await
                .expect("open store"),
        );
        let chunker: Arc<dyn Chunker> = Arc::new(MockChunker);
        Self {
            indexer: Indexer::new(
                Arc::clone(&store),
                parser,
                chunker,
                embedder.clone(),
            ),
            searcher: Searcher::new(Arc::clone(&store), embedder),
            store,
            project_dir: TempDir::new().expect("create project dir"),
            _db_dir: db_dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.project_dir.path()
    }

    /// Write files into the project directory: `(rel_path, content)`.
    pub fn write_tree(&self, files: &[(&str, &str)]) {
        for (rel, content) in files {
            let path = self.root().join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create parent dirs");
            }
            std::fs::write(path, content).expect("write file");
        }
    }

    /// Project id after the first indexing run.
    pub async fn project_id(&self) -> i64 {
        let projects = self.store.list_projects().await.expect("list projects");
        projects.first().expect("a project exists").id
    }
}

// ============ Mock parser ============

pub struct MockParser;

fn pattern_flags_for(name: &str) -> PatternFlags {
    PatternFlags {
        aggregate: name.ends_with("Aggregate"),
        entity: name.ends_with("Entity"),
        value_object: name.ends_with("ValueObject"),
        repository: name.ends_with("Repository"),
        service: name.ends_with("Service"),
        command: name.ends_with("Command"),
        query: name.ends_with("Query"),
        handler: name.ends_with("Handler"),
    }
}

fn parse_source(content: &str) -> ParseResult {
    let mut result = ParseResult::default();
    let lines: Vec<&str> = content.lines().collect();
    let mut pending_doc: Vec<String> = Vec::new();

    // End line of a symbol: the line before the next declaration or EOF.
    let decl_starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            let t = line.trim_start();
            t.starts_with("fn ") || t.starts_with("struct ") || t.starts_with("method ")
                || t.starts_with("interface ")
        })
        .map(|(i, _)| i)
        .collect();
    let end_line_for = |start: usize| -> u32 {
        decl_starts
            .iter()
            .find(|&&s| s > start)
            .map(|&s| s as u32) // line before the next decl, 1-indexed
            .unwrap_or(lines.len() as u32)
    };

    for (index, raw) in lines.iter().enumerate() {
        let line_no = (index + 1) as u32;
        let line = raw.trim();
        if line.starts_with('#') {
            pending_doc.push(line.trim_start_matches('#').trim().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("package ") {
            if result.package_name.is_empty() {
                result.package_name = rest.trim().to_string();
            }
        } else if let Some(rest) = line.strip_prefix("import ") {
            let rest = rest.trim();
            let (path, alias) = match rest.split_once(" as ") {
                Some((p, a)) => (p.trim(), a.trim()),
                None => (rest, ""),
            };
            result.imports.push(ImportDecl {
                path: path.trim_matches('"').to_string(),
                alias: alias.to_string(),
            });
        } else if line == "!!!" {
            result.errors.push(ParseIssue {
                message: format!("syntax error at line {line_no}"),
            });
        } else {
            let (kind, name, receiver) = if let Some(rest) = line.strip_prefix("fn ") {
                let name = rest.split('(').next().unwrap_or(rest).trim();
                (Some(SymbolKind::Function), name.to_string(), String::new())
            } else if let Some(rest) = line.strip_prefix("struct ") {
                (Some(SymbolKind::Struct), rest.trim().to_string(), String::new())
            } else if let Some(rest) = line.strip_prefix("interface ") {
                (Some(SymbolKind::Interface), rest.trim().to_string(), String::new())
            } else if let Some(rest) = line.strip_prefix("method ") {
                let rest = rest.split('(').next().unwrap_or(rest).trim();
                match rest.split_once('.') {
                    Some((recv, name)) => {
                        (Some(SymbolKind::Method), name.to_string(), recv.to_string())
                    }
                    None => (Some(SymbolKind::Method), rest.to_string(), String::new()),
                }
            } else {
                (None, String::new(), String::new())
            };

            if let Some(kind) = kind {
                let scope = if name.chars().next().is_some_and(|c| c.is_uppercase()) {
                    "exported"
                } else {
                    "internal"
                };
                result.symbols.push(SymbolInfo {
                    patterns: pattern_flags_for(&name),
                    name,
                    kind,
                    package_name: result.package_name.clone(),
                    signature: line.to_string(),
                    doc: pending_doc.join("\n"),
                    scope: scope.to_string(),
                    receiver,
                    start_line: line_no,
                    start_col: 1,
                    end_line: end_line_for(index),
                    end_col: raw.len().max(1) as u32,
                });
            }
            pending_doc.clear();
        }
    }
    result
}

#[async_trait]
impl SourceParser for MockParser {
    fn extensions(&self) -> &[&str] {
        &["src"]
    }

    async fn parse(&self, path: &Path) -> Result<ParseResult, ParserError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|source| {
            ParserError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(parse_source(&content))
    }

    async fn manifest(&self, root: &Path) -> Option<ModuleManifest> {
        let content = tokio::fs::read_to_string(root.join("module.toy")).await.ok()?;
        let mut manifest = ModuleManifest::default();
        for line in content.lines() {
            if let Some(rest) = line.strip_prefix("module ") {
                manifest.module_name = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("version ") {
                manifest.language_version = rest.trim().to_string();
            }
        }
        Some(manifest)
    }
}

/// MockParser with a fixed per-file delay, for tests that need a run to
/// stay in flight (lock contention, cancellation).
pub struct SlowParser {
    pub delay: std::time::Duration,
}

#[async_trait]
impl SourceParser for SlowParser {
    fn extensions(&self) -> &[&str] {
        MockParser.extensions()
    }

    async fn parse(&self, path: &Path) -> Result<ParseResult, ParserError> {
        tokio::time::sleep(self.delay).await;
        MockParser.parse(path).await
    }

    async fn manifest(&self, root: &Path) -> Option<ModuleManifest> {
        MockParser.manifest(root).await
    }
}

// ============ Mock chunker ============

/// One chunk per symbol (linked via `symbol_index`), or a single whole-file
/// block when the parser recovered no symbols.
pub struct MockChunker;

fn hash_hex(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

#[async_trait]
impl Chunker for MockChunker {
    async fn chunk(
        &self,
        path: &Path,
        parse: &ParseResult,
    ) -> Result<Vec<ChunkData>, ChunkerError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ChunkerError::Internal(e.to_string()))?;
        let lines: Vec<&str> = content.lines().collect();

        if parse.symbols.is_empty() {
            if content.trim().is_empty() {
                return Ok(Vec::new());
            }
            let end_line = lines.len().max(1) as u32;
            return Ok(vec![ChunkData {
                content_hash: hash_hex(&content),
                content,
                token_count: 1,
                start_line: 1,
                end_line,
                context_before: String::new(),
                context_after: String::new(),
                kind: ChunkKind::Block,
                symbol_index: None,
            }]);
        }

        let mut chunks = Vec::with_capacity(parse.symbols.len());
        for (index, symbol) in parse.symbols.iter().enumerate() {
            let start = (symbol.start_line as usize).saturating_sub(1);
            let end = (symbol.end_line as usize).min(lines.len());
            let body = lines[start..end].join("\n");
            let context_before = if start > 0 { lines[start - 1].to_string() } else { String::new() };
            let context_after = lines.get(end).map(|l| l.to_string()).unwrap_or_default();
            chunks.push(ChunkData {
                content_hash: hash_hex(&body),
                token_count: body.split_whitespace().count() as u32,
                content: body,
                start_line: symbol.start_line,
                end_line: symbol.end_line,
                context_before,
                context_after,
                kind: match symbol.kind {
                    SymbolKind::Function => ChunkKind::Function,
                    SymbolKind::Method => ChunkKind::Method,
                    SymbolKind::Struct => ChunkKind::Struct,
                    SymbolKind::Interface => ChunkKind::Interface,
                    _ => ChunkKind::Block,
                },
                symbol_index: Some(index),
            });
        }
        Ok(chunks)
    }
}

// ============ Mock embedders ============

/// Deterministic bag-of-words embedder with a small synonym table, so two
/// texts can be made semantically close without sharing any literal token.
pub struct MockEmbedder;

fn canonical(word: &str) -> &str {
    match word {
        "automobile" | "car" | "vehicle" => "car",
        "fetch" | "retrieve" | "load" => "fetch",
        "auth" | "login" | "signin" => "auth",
        other => other,
    }
}

fn fnv(word: &str) -> u64 {
    // FNV-1a, stable across runs and platforms
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Pinned slots for the vocabulary tests reason about; everything else
/// hashes into the remaining slots so it can never collide with a pinned
/// word and skew a carefully constructed similarity.
fn slot_for(word: &str) -> usize {
    const PINNED: usize = 11;
    match canonical(word) {
        "car" => 0,
        "wrench" => 1,
        "fetch" => 2,
        "auth" => 3,
        "zebra" => 4,
        "pickle" => 5,
        "quantum" => 6,
        "engine" => 7,
        "token" => 8,
        "needle" => 9,
        "haystack" => 10,
        other => PINNED + (fnv(other) % (EMBED_DIM - PINNED) as u64) as usize,
    }
}

pub fn mock_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBED_DIM];
    for word in text.split_whitespace() {
        let word = word.to_lowercase();
        let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
        if trimmed.is_empty() {
            continue;
        }
        vector[slot_for(trimmed)] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn dimension(&self) -> usize {
        EMBED_DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, EmbedderError> {
        Ok(EmbeddingBatch {
            vectors: texts
                .iter()
                .map(|text| EmbeddingVector {
                    vector: mock_embedding(text),
                    dimension: EMBED_DIM as u32,
                    provider: "mock".to_string(),
                    model: "bag-of-words-v1".to_string(),
                })
                .collect(),
        })
    }
}

/// Fails every batch. Used to exercise orphan reconciliation.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn dimension(&self) -> usize {
        EMBED_DIM
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<EmbeddingBatch, EmbedderError> {
        Err(EmbedderError::RequestFailed("mock provider always fails".into()))
    }
}

/// Reports itself unavailable; `embed_batch` must never be reached.
pub struct UnavailableEmbedder;

#[async_trait]
impl Embedder for UnavailableEmbedder {
    fn dimension(&self) -> usize {
        EMBED_DIM
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<EmbeddingBatch, EmbedderError> {
        panic!("embed_batch called on an unavailable provider");
    }

    async fn is_available(&self) -> bool {
        false
    }
}
