//! Chunker interface.
//!
//! Chunking is an external collaborator: given a file's [`ParseResult`], it
//! slices the source into retrieval units with surrounding context. The
//! pipeline persists whatever the chunker yields and links chunks back to
//! symbols by index into the parse result.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::ParseResult;

#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("Chunker internal error: {0}")]
    Internal(String),
}

/// Kind of a chunk, stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Method,
    Struct,
    Interface,
    Block,
    FileHeader,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Struct => "struct",
            ChunkKind::Interface => "interface",
            ChunkKind::Block => "block",
            ChunkKind::FileHeader => "file_header",
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChunkKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(ChunkKind::Function),
            "method" => Ok(ChunkKind::Method),
            "struct" => Ok(ChunkKind::Struct),
            "interface" => Ok(ChunkKind::Interface),
            "block" => Ok(ChunkKind::Block),
            "file_header" => Ok(ChunkKind::FileHeader),
            other => Err(format!("unknown chunk kind: {other}")),
        }
    }
}

/// One retrieval unit produced by the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkData {
    /// The code slice itself.
    pub content: String,
    /// Hex content hash, bookkeeping only (files are the change-detection
    /// authority).
    pub content_hash: String,
    pub token_count: u32,
    /// 1-indexed line span; `(file, start_line, end_line)` is the chunk's
    /// identity in the store.
    pub start_line: u32,
    pub end_line: u32,
    /// Context lines preceding/following the slice, may be empty.
    pub context_before: String,
    pub context_after: String,
    pub kind: ChunkKind,
    /// Index into `ParseResult::symbols` for the symbol this chunk covers,
    /// if any. The pipeline resolves it to a row id after symbols persist.
    pub symbol_index: Option<usize>,
}

/// External chunker.
#[async_trait]
pub trait Chunker: Send + Sync {
    /// Slice one parsed file into chunks. Order is not significant; chunks
    /// must not duplicate `(start_line, end_line)` spans within a file.
    async fn chunk(
        &self,
        path: &Path,
        parse: &ParseResult,
    ) -> Result<Vec<ChunkData>, ChunkerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_kind_round_trip() {
        for kind in [
            ChunkKind::Function,
            ChunkKind::Method,
            ChunkKind::Struct,
            ChunkKind::Interface,
            ChunkKind::Block,
            ChunkKind::FileHeader,
        ] {
            assert_eq!(kind.as_str().parse::<ChunkKind>().unwrap(), kind);
        }
        assert!("slab".parse::<ChunkKind>().is_err());
    }
}
