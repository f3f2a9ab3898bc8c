use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tokens::ContentKind;

/// How a file's content is split into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Pack whole lines under the budget, overlapping by line count
    Lines,
    /// Cut at function/method boundaries
    Functions,
    /// Cut at class/type boundaries; oversized classes are cut at their methods
    Classes,
    /// Cut at document headers
    Sections,
    /// Pack by token budget only, overlapping by character count
    Tokens,
    /// Pick one of the above from the content kind and its structure
    #[default]
    Smart,
}

impl ChunkStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStrategy::Lines => "lines",
            ChunkStrategy::Functions => "functions",
            ChunkStrategy::Classes => "classes",
            ChunkStrategy::Sections => "sections",
            ChunkStrategy::Tokens => "tokens",
            ChunkStrategy::Smart => "smart",
        }
    }

    /// Parse strategy from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "lines" | "line" | "line_based" => Some(ChunkStrategy::Lines),
            "functions" | "function" | "function_based" => Some(ChunkStrategy::Functions),
            "classes" | "class" | "class_based" => Some(ChunkStrategy::Classes),
            "sections" | "section" | "section_based" => Some(ChunkStrategy::Sections),
            "tokens" | "token" | "token_based" => Some(ChunkStrategy::Tokens),
            "smart" | "auto" => Some(ChunkStrategy::Smart),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position and cost information for one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub id: String,
    pub file_id: String,
    /// Zero-based position of the chunk in its file
    pub index: usize,
    /// First line (1-based) of the chunk body, overlap excluded
    pub start_line: usize,
    /// Last line (1-based, inclusive) of the chunk body
    pub end_line: usize,
    /// Estimate for the full content, overlap included
    pub estimated_tokens: usize,
    pub content_kind: ContentKind,
    /// Strategy that actually produced the chunk (after any fallback)
    pub strategy: ChunkStrategy,
    /// Number of lines (or line fragments) repeated from the previous chunk
    pub overlap_lines: usize,
    /// Byte length of the repeated prefix
    pub overlap_len: usize,
    pub overlap_with_previous: bool,
    pub overlap_with_next: bool,
}

/// A bounded slice of one file's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Content with the overlapping prefix removed
    pub fn body(&self) -> &str {
        &self.content[self.metadata.overlap_len..]
    }

    /// Repeated prefix shared with the previous chunk
    pub fn overlap(&self) -> &str {
        &self.content[..self.metadata.overlap_len]
    }

    pub fn line_count(&self) -> usize {
        self.metadata.end_line + 1 - self.metadata.start_line
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Chunk {}: lines {}-{}",
            self.metadata.id, self.metadata.start_line, self.metadata.end_line
        )
    }
}

/// Concatenate chunk bodies back into the original content
pub fn reconstruct(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::body).collect()
}
