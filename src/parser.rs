//! Source parser interface.
//!
//! Parsing is an external collaborator: the indexing pipeline consumes a
//! [`ParseResult`] and never inspects syntax itself. Implementations wrap a
//! real AST parser; the crate's tests wrap a line-oriented stub. Recoverable
//! syntax errors are returned through [`ParseResult::errors`], not `Err`;
//! a file with broken syntax is still indexed with whatever was recovered.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a parser implementation may surface.
///
/// These are the *unrecoverable* cases (I/O, internal faults). Syntax
/// problems belong in [`ParseResult::errors`].
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parser internal error: {0}")]
    Internal(String),
}

/// Kind of a parsed symbol, stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Struct,
    Interface,
    Type,
    Constant,
    Variable,
}

impl SymbolKind {
    /// String representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::Type => "type",
            SymbolKind::Constant => "constant",
            SymbolKind::Variable => "variable",
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SymbolKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(SymbolKind::Function),
            "method" => Ok(SymbolKind::Method),
            "struct" => Ok(SymbolKind::Struct),
            "interface" => Ok(SymbolKind::Interface),
            "type" => Ok(SymbolKind::Type),
            "constant" => Ok(SymbolKind::Constant),
            "variable" => Ok(SymbolKind::Variable),
            other => Err(format!("unknown symbol kind: {other}")),
        }
    }
}

/// Domain-role markers supplied by the parser.
///
/// The store persists these verbatim; it never computes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternFlags {
    pub aggregate: bool,
    pub entity: bool,
    pub value_object: bool,
    pub repository: bool,
    pub service: bool,
    pub command: bool,
    pub query: bool,
    pub handler: bool,
}

impl PatternFlags {
    /// The flag names in storage-column order.
    pub const NAMES: [&'static str; 8] = [
        "aggregate",
        "entity",
        "value_object",
        "repository",
        "service",
        "command",
        "query",
        "handler",
    ];

    /// Whether the named pattern flag is set. Unknown names are `false`.
    pub fn has(&self, name: &str) -> bool {
        match name {
            "aggregate" => self.aggregate,
            "entity" => self.entity,
            "value_object" => self.value_object,
            "repository" => self.repository,
            "service" => self.service,
            "command" => self.command,
            "query" => self.query,
            "handler" => self.handler,
            _ => false,
        }
    }
}

/// A symbol recovered from one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    /// Package the symbol belongs to (mirrors the file's package).
    pub package_name: String,
    /// Declaration line, e.g. `fn parse(input: &str) -> Config`.
    pub signature: String,
    /// Documentation comment, empty when absent.
    pub doc: String,
    /// Visibility scope as the source language defines it.
    pub scope: String,
    /// Receiver type for methods, empty otherwise.
    pub receiver: String,
    /// 1-indexed position span.
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub patterns: PatternFlags,
}

/// An import declaration recovered from one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDecl {
    pub path: String,
    /// Local alias, empty when the import is unaliased.
    pub alias: String,
}

/// A recoverable syntax error. The first error's message is persisted on the
/// file row; indexing continues with the recovered symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseIssue {
    pub message: String,
}

/// Everything the parser recovered from one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseResult {
    pub package_name: String,
    pub imports: Vec<ImportDecl>,
    pub symbols: Vec<SymbolInfo>,
    pub errors: Vec<ParseIssue>,
}

/// Module metadata parsed from a manifest file at the project root
/// (a `go.mod` / `Cargo.toml` analogue for the target language).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub module_name: String,
    pub language_version: String,
}

/// External source-language parser.
#[async_trait]
pub trait SourceParser: Send + Sync {
    /// File extensions (without the dot) this parser understands.
    fn extensions(&self) -> &[&str];

    /// Parse one file. Syntax errors are reported via `ParseResult::errors`,
    /// never as `Err`. `Err` is reserved for I/O and internal faults.
    async fn parse(&self, path: &Path) -> Result<ParseResult, ParserError>;

    /// Read module metadata from a manifest at the project root, if the
    /// target language has one and it is present.
    async fn manifest(&self, _root: &Path) -> Option<ModuleManifest> {
        None
    }
}
