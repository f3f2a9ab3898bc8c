//! Heuristic token estimation for context-window budgeting.
//!
//! Estimates are deliberately conservative: structural characters usually
//! become their own tokens, so they are weighted up, while whitespace tends to
//! merge into neighbouring tokens and is weighted down.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use super::bpe;

/// Characters that usually tokenize on their own
const STRUCTURAL_CHARS: &str = "{}()[];,.\"'`-_=+*&^%$#@!~<>/?\\|";

const STRUCTURAL_WEIGHT: f64 = 0.3;
const WHITESPACE_WEIGHT: f64 = 0.1;

/// Characters per second used for processing-time estimates
const BASE_PROCESSING_RATE: f64 = 10_000.0;

/// Kind of content being measured; selects the chars-per-token ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Code,
    Markdown,
    #[default]
    PlainText,
    Json,
    Yaml,
    Xml,
}

impl ContentKind {
    pub const ALL: [ContentKind; 6] = [
        ContentKind::Code,
        ContentKind::Markdown,
        ContentKind::PlainText,
        ContentKind::Json,
        ContentKind::Yaml,
        ContentKind::Xml,
    ];

    /// Average characters per token
    pub fn chars_per_token(self) -> f64 {
        match self {
            ContentKind::Code => 3.2,
            ContentKind::Markdown => 3.8,
            ContentKind::PlainText => 4.0,
            ContentKind::Json => 3.0,
            ContentKind::Yaml => 3.5,
            ContentKind::Xml => 2.8,
        }
    }

    /// Relative processing cost, 1.0 for plain text
    pub fn complexity(self) -> f64 {
        match self {
            ContentKind::Code => 1.5,
            ContentKind::Markdown => 1.2,
            ContentKind::PlainText => 1.0,
            ContentKind::Json => 1.3,
            ContentKind::Yaml => 1.1,
            ContentKind::Xml => 1.4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Code => "code",
            ContentKind::Markdown => "markdown",
            ContentKind::PlainText => "plain_text",
            ContentKind::Json => "json",
            ContentKind::Yaml => "yaml",
            ContentKind::Xml => "xml",
        }
    }

    /// Parse a kind name (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "code" => Some(ContentKind::Code),
            "markdown" | "md" => Some(ContentKind::Markdown),
            "plain_text" | "plain" | "text" => Some(ContentKind::PlainText),
            "json" => Some(ContentKind::Json),
            "yaml" | "yml" => Some(ContentKind::Yaml),
            "xml" | "html" => Some(ContentKind::Xml),
            _ => None,
        }
    }

    /// Guess the kind from a file extension (without the dot)
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "md" | "markdown" | "mdx" | "rst" => ContentKind::Markdown,
            "json" | "jsonc" | "json5" | "ipynb" => ContentKind::Json,
            "yaml" | "yml" | "toml" => ContentKind::Yaml,
            "xml" | "html" | "htm" | "svg" | "xsd" | "xaml" | "vue" => ContentKind::Xml,
            "rs" | "py" | "pyi" | "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "go" | "c"
            | "h" | "cc" | "cpp" | "cxx" | "hpp" | "hh" | "java" | "kt" | "kts" | "scala"
            | "cs" | "rb" | "php" | "swift" | "m" | "mm" | "sh" | "bash" | "zsh" | "lua"
            | "dart" | "sql" | "r" | "pl" | "ex" | "exs" | "erl" | "hs" | "ml" | "clj"
            | "groovy" | "gradle" | "css" | "scss" | "less" => ContentKind::Code,
            _ => ContentKind::PlainText,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(ContentKind::PlainText)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token limits for one consumer model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLimits {
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    /// Buffer kept free so estimates never brush the hard limit
    pub safety_margin: usize,
}

impl TokenLimits {
    pub const DEFAULT_SAFETY_MARGIN: usize = 500;

    pub fn new(max_input_tokens: usize, max_output_tokens: usize) -> Self {
        Self {
            max_input_tokens,
            max_output_tokens,
            safety_margin: Self::DEFAULT_SAFETY_MARGIN,
        }
    }

    pub fn safe_input_limit(&self) -> usize {
        self.max_input_tokens.saturating_sub(self.safety_margin)
    }
}

/// Known consumer models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ModelProfile {
    #[serde(rename = "gpt-3.5")]
    Gpt35,
    #[serde(rename = "gpt-4")]
    Gpt4,
    #[serde(rename = "claude")]
    Claude,
    #[default]
    #[serde(rename = "generic")]
    Generic,
}

impl ModelProfile {
    pub fn limits(self) -> TokenLimits {
        match self {
            ModelProfile::Gpt35 => TokenLimits::new(4096, 4096),
            ModelProfile::Gpt4 => TokenLimits::new(8192, 8192),
            ModelProfile::Claude => TokenLimits::new(100_000, 4096),
            ModelProfile::Generic => TokenLimits::new(4000, 1000),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelProfile::Gpt35 => "gpt-3.5",
            ModelProfile::Gpt4 => "gpt-4",
            ModelProfile::Claude => "claude",
            ModelProfile::Generic => "generic",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gpt-3.5" | "gpt-3.5-turbo" | "gpt35" => Some(ModelProfile::Gpt35),
            "gpt-4" | "gpt4" => Some(ModelProfile::Gpt4),
            "claude" => Some(ModelProfile::Claude),
            "generic" => Some(ModelProfile::Generic),
            _ => None,
        }
    }
}

/// Recommendation returned by [`TokenEstimator::recommend_chunking`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ChunkingPlan {
    Single {
        max_chunk_chars: usize,
    },
    Chunked {
        chunks_needed: usize,
        max_chunk_chars: usize,
        overlap_chars: usize,
        estimated_tokens: usize,
    },
}

impl ChunkingPlan {
    pub fn chunks_needed(&self) -> usize {
        match self {
            ChunkingPlan::Single { .. } => 1,
            ChunkingPlan::Chunked { chunks_needed, .. } => *chunks_needed,
        }
    }
}

/// Deterministic, conservative token estimator.
///
/// Pure and cheap; construct one at startup and share it by reference.
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    profile: ModelProfile,
    limits: TokenLimits,
    bpe_calibration: bool,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(ModelProfile::Generic)
    }
}

impl TokenEstimator {
    pub fn new(profile: ModelProfile) -> Self {
        Self {
            profile,
            limits: profile.limits(),
            bpe_calibration: false,
        }
    }

    /// Override the profile's limits (e.g. a custom context window)
    pub fn with_limits(mut self, limits: TokenLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_safety_margin(mut self, margin: usize) -> Self {
        self.limits.safety_margin = margin;
        self
    }

    /// Never report fewer tokens than the p50k BPE encoding produces
    pub fn with_bpe_calibration(mut self, enabled: bool) -> Self {
        self.bpe_calibration = enabled;
        self
    }

    pub fn bpe_calibrated(&self) -> bool {
        self.bpe_calibration
    }

    pub fn profile(&self) -> ModelProfile {
        self.profile
    }

    pub fn limits(&self) -> TokenLimits {
        self.limits
    }

    pub fn safe_limit(&self) -> usize {
        self.limits.safe_input_limit()
    }

    /// Tokens left in the safe budget after reserving `reserved`
    pub fn available(&self, reserved: usize) -> usize {
        self.safe_limit().saturating_sub(reserved)
    }

    /// Estimated token cost of `content`; 0 only for empty input
    pub fn estimate(&self, content: &str, kind: ContentKind) -> usize {
        let heuristic = heuristic_estimate(content, kind);
        if !self.bpe_calibration || content.is_empty() {
            return heuristic;
        }
        match bpe::count_tokens(content) {
            Some(exact) => heuristic.max(exact),
            None => heuristic,
        }
    }

    /// Per-line estimates, one entry per line of `content`
    pub fn estimate_lines(&self, content: &str, kind: ContentKind) -> Vec<usize> {
        content.lines().map(|line| self.estimate(line, kind)).collect()
    }

    pub fn estimate_all<S: AsRef<str>>(&self, items: &[S], kind: ContentKind) -> usize {
        items.iter().map(|s| self.estimate(s.as_ref(), kind)).sum()
    }

    /// Whether `content` fits the safe budget minus `reserved`
    pub fn fits(&self, content: &str, kind: ContentKind, reserved: usize) -> bool {
        self.estimate(content, kind) <= self.available(reserved)
    }

    /// List form of [`fits`](Self::fits): the items are measured together
    pub fn fits_all<S: AsRef<str>>(&self, items: &[S], kind: ContentKind, reserved: usize) -> bool {
        self.estimate_all(items, kind) <= self.available(reserved)
    }

    /// Conservative character budget for one chunk (20% buffer, floor of 1000)
    pub fn max_chunk_chars(&self, kind: ContentKind, reserved: usize) -> usize {
        let chars = self.available(reserved) as f64 * kind.chars_per_token() * 0.8;
        (chars as usize).max(1000)
    }

    pub fn estimate_processing_time(&self, content_chars: usize, kind: ContentKind) -> Duration {
        Duration::from_secs_f64(content_chars as f64 * kind.complexity() / BASE_PROCESSING_RATE)
    }

    /// Suggest whether content of `total_chars` needs chunking, and how
    pub fn recommend_chunking(&self, total_chars: usize, kind: ContentKind) -> ChunkingPlan {
        let estimated_tokens = if total_chars == 0 {
            0
        } else {
            ((total_chars as f64 / kind.chars_per_token()) as usize).max(1)
        };
        let max_chunk_tokens = (self.safe_limit() / 3).max(1);

        if estimated_tokens <= max_chunk_tokens {
            return ChunkingPlan::Single {
                max_chunk_chars: total_chars,
            };
        }

        let max_chunk_chars = self.max_chunk_chars(kind, 1000);
        ChunkingPlan::Chunked {
            chunks_needed: estimated_tokens.div_ceil(max_chunk_tokens),
            max_chunk_chars,
            overlap_chars: max_chunk_chars / 10,
            estimated_tokens,
        }
    }
}

/// The ratio-based estimate, without BPE calibration
pub fn heuristic_estimate(content: &str, kind: ContentKind) -> usize {
    CharTally::of(content).estimate(kind)
}

/// Character counts the heuristic is computed from.
///
/// Tallies of adjacent slices add up to the tally of the joined slice, so a
/// prefix table of tallies prices any run of lines without rescanning it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharTally {
    pub chars: usize,
    pub structural: usize,
    pub whitespace: usize,
}

impl CharTally {
    pub fn of(content: &str) -> Self {
        let mut tally = Self::default();
        for c in content.chars() {
            tally.chars += 1;
            if c.is_whitespace() {
                tally.whitespace += 1;
            } else if STRUCTURAL_CHARS.contains(c) {
                tally.structural += 1;
            }
        }
        tally
    }

    /// Tally of the text between an earlier prefix tally and this one
    pub fn since(&self, earlier: &CharTally) -> CharTally {
        CharTally {
            chars: self.chars - earlier.chars,
            structural: self.structural - earlier.structural,
            whitespace: self.whitespace - earlier.whitespace,
        }
    }

    /// Same value [`heuristic_estimate`] returns for the tallied text
    pub fn estimate(&self, kind: ContentKind) -> usize {
        if self.chars == 0 {
            return 0;
        }
        let base = self.chars as f64 / kind.chars_per_token();
        let estimate = base + self.structural as f64 * STRUCTURAL_WEIGHT
            - self.whitespace as f64 * WHITESPACE_WEIGHT;
        if estimate < 1.0 {
            1
        } else {
            estimate as usize
        }
    }
}

impl std::ops::Add for CharTally {
    type Output = CharTally;

    fn add(self, other: CharTally) -> CharTally {
        CharTally {
            chars: self.chars + other.chars,
            structural: self.structural + other.structural,
            whitespace: self.whitespace + other.whitespace,
        }
    }
}
