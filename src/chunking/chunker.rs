use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;
use tracing::debug;

use super::boundaries::{self, Language};
use super::chunk::{Chunk, ChunkMetadata, ChunkStrategy};
use crate::tokens::{bpe, CharTally, ContentKind, TokenEstimator};

/// Default number of lines repeated at the start of each line-based chunk
pub const DEFAULT_OVERLAP_LINES: usize = 3;
/// Default number of characters repeated at the start of each token-based chunk
pub const DEFAULT_OVERLAP_CHARS: usize = 240;

/// Per-call chunking parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOptions {
    pub strategy: ChunkStrategy,
    /// Token budget per chunk; `None` uses a quarter of the safe input limit
    pub max_tokens: Option<usize>,
    pub overlap_lines: usize,
    pub overlap_chars: usize,
    /// Override the kind inferred from the file id
    pub kind: Option<ContentKind>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Smart,
            max_tokens: None,
            overlap_lines: DEFAULT_OVERLAP_LINES,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
            kind: None,
        }
    }
}

impl ChunkOptions {
    pub fn with_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_overlap_lines(mut self, lines: usize) -> Self {
        self.overlap_lines = lines;
        self
    }

    pub fn with_overlap_chars(mut self, chars: usize) -> Self {
        self.overlap_chars = chars;
        self
    }

    pub fn with_kind(mut self, kind: ContentKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// A contiguous slice of the content; a whole line or a fragment of a long one
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    /// 1-based line the piece belongs to
    line: usize,
}

/// Piece ranges for one chunk: `overlap_from..start` is repeated, `start..end` is new
#[derive(Debug, Clone)]
struct Draft {
    overlap_from: usize,
    body: Range<usize>,
    strategy: ChunkStrategy,
}

enum Overlap {
    Lines(usize),
    Chars(usize),
}

struct Input<'a> {
    content: &'a str,
    lines: Vec<&'a str>,
    pieces: Vec<Piece>,
    kind: ContentKind,
    lang: Language,
    budget: usize,
    /// `tallies[i]` covers pieces `0..i`
    tallies: Vec<CharTally>,
    /// Running p50k counts per piece, present when calibration is on
    bpe_counts: Option<Vec<usize>>,
}

impl<'a> Input<'a> {
    fn new(
        content: &'a str,
        lines: Vec<&'a str>,
        pieces: Vec<Piece>,
        kind: ContentKind,
        lang: Language,
        budget: usize,
        calibrate: bool,
    ) -> Self {
        let mut tallies = Vec::with_capacity(pieces.len() + 1);
        let mut running = CharTally::default();
        tallies.push(running);
        for piece in &pieces {
            running = running + CharTally::of(&content[piece.start..piece.end]);
            tallies.push(running);
        }

        let bpe_counts = calibrate.then(|| {
            let mut counts = Vec::with_capacity(pieces.len() + 1);
            let mut total = 0;
            counts.push(total);
            for piece in &pieces {
                total += bpe::count_tokens_uncached(&content[piece.start..piece.end]).unwrap_or(0);
                counts.push(total);
            }
            counts
        });

        Self {
            content,
            lines,
            pieces,
            kind,
            lang,
            budget,
            tallies,
            bpe_counts,
        }
    }

    fn text(&self, range: Range<usize>) -> &str {
        if range.is_empty() {
            return "";
        }
        &self.content[self.pieces[range.start].start..self.pieces[range.end - 1].end]
    }

    fn tally(&self, range: Range<usize>) -> CharTally {
        self.tallies[range.end].since(&self.tallies[range.start])
    }

    /// Estimated tokens for a run of pieces, from the prefix tables.
    /// Calibrated counts are per-piece sums.
    fn cost(&self, range: Range<usize>) -> usize {
        if range.is_empty() {
            return 0;
        }
        let heuristic = self.tally(range.clone()).estimate(self.kind);
        match &self.bpe_counts {
            Some(counts) => heuristic.max(counts[range.end] - counts[range.start]),
            None => heuristic,
        }
    }
}

/// Splits content into chunks that respect structural boundaries and a token budget.
///
/// Every chunk's body (content minus its overlap prefix) is contiguous with
/// the next, so concatenating the bodies reproduces the input exactly.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    estimator: TokenEstimator,
    chunk_tokens: Option<usize>,
}

impl Chunker {
    pub fn new(estimator: TokenEstimator) -> Self {
        Self {
            estimator,
            chunk_tokens: None,
        }
    }

    /// Budget for callers that do not pass one (default: a quarter of the safe limit)
    pub fn with_chunk_tokens(mut self, chunk_tokens: usize) -> Self {
        self.chunk_tokens = Some(chunk_tokens.max(1));
        self
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Budget used when the caller does not pass one
    pub fn default_max_tokens(&self) -> usize {
        self.chunk_tokens
            .unwrap_or_else(|| (self.estimator.safe_limit() / 4).max(1))
    }

    /// Strategy `Smart` resolves to for this content
    pub fn choose_strategy(&self, file_id: &str, content: &str, kind: ContentKind) -> ChunkStrategy {
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let lang = Language::detect(file_id, &lines);
        select_strategy(&lines, kind, lang)
    }

    /// Split `content` into ordered chunks. Empty content yields no chunks.
    pub fn chunk(&self, file_id: &str, content: &str, options: &ChunkOptions) -> Vec<Chunk> {
        if content.is_empty() {
            return Vec::new();
        }

        let kind = options
            .kind
            .unwrap_or_else(|| ContentKind::from_path(Path::new(file_id)));
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let lang = Language::detect(file_id, &lines);
        let strategy = match options.strategy {
            ChunkStrategy::Smart => select_strategy(&lines, kind, lang),
            explicit => explicit,
        };
        let budget = options
            .max_tokens
            .unwrap_or_else(|| self.default_max_tokens())
            .max(1);

        let pieces = if strategy == ChunkStrategy::Tokens {
            fragment_lines(&lines, fragment_chars(budget, kind))
        } else {
            whole_lines(&lines)
        };
        let input = Input::new(
            content,
            lines,
            pieces,
            kind,
            lang,
            budget,
            self.estimator.bpe_calibrated(),
        );

        let drafts = match strategy {
            ChunkStrategy::Lines | ChunkStrategy::Smart => self.by_lines(&input, options),
            ChunkStrategy::Tokens => self.pack_with_overlap(
                &input,
                Overlap::Chars(options.overlap_chars),
                ChunkStrategy::Tokens,
            ),
            ChunkStrategy::Functions => self.by_functions(&input, options),
            ChunkStrategy::Classes => self.by_classes(&input, options),
            ChunkStrategy::Sections => self.by_sections(&input, options),
        };

        debug!(
            "Chunked {} ({} lines, {}) into {} chunks using {}",
            file_id,
            input.lines.len(),
            kind,
            drafts.len(),
            drafts.first().map_or(strategy, |d| d.strategy)
        );
        self.finish(file_id, &input, drafts)
    }

    fn by_lines(&self, input: &Input, options: &ChunkOptions) -> Vec<Draft> {
        self.pack_with_overlap(
            input,
            Overlap::Lines(options.overlap_lines),
            ChunkStrategy::Lines,
        )
    }

    fn by_functions(&self, input: &Input, options: &ChunkOptions) -> Vec<Draft> {
        let spans = boundaries::find_functions(&input.lines, input.lang);
        if spans.is_empty() {
            return self.by_lines(input, options);
        }
        let units = boundaries::cut_at(0..input.lines.len(), &spans);
        self.pack(input, &units, ChunkStrategy::Functions)
    }

    fn by_classes(&self, input: &Input, options: &ChunkOptions) -> Vec<Draft> {
        let classes = boundaries::find_classes(&input.lines, input.lang);
        if classes.is_empty() {
            return self.by_functions(input, options);
        }

        let class_spans: HashSet<&Range<usize>> = classes.iter().collect();
        let mut units = Vec::new();
        for unit in boundaries::cut_at(0..input.lines.len(), &classes) {
            let is_class = class_spans.contains(&unit);
            if is_class && input.cost(unit.clone()) > input.budget {
                // Oversized class: cut after its header and at each method
                let body = unit.start + 1..unit.end;
                let mut split = boundaries::find_functions_in(&input.lines, input.lang, body);
                split.push(unit.start..unit.start + 1);
                units.extend(boundaries::cut_at(unit, &split));
            } else {
                units.push(unit);
            }
        }
        self.pack(input, &units, ChunkStrategy::Classes)
    }

    fn by_sections(&self, input: &Input, options: &ChunkOptions) -> Vec<Draft> {
        let starts = boundaries::find_sections(&input.lines);
        if starts.is_empty() {
            return self.by_lines(input, options);
        }
        let spans: Vec<Range<usize>> = starts.iter().map(|&s| s..s).collect();
        let units = boundaries::cut_at(0..input.lines.len(), &spans);
        self.pack(input, &units, ChunkStrategy::Sections)
    }

    /// Greedily merge adjacent units while the merged cost stays in budget.
    /// A unit that alone exceeds the budget becomes its own chunk.
    fn pack(&self, input: &Input, units: &[Range<usize>], strategy: ChunkStrategy) -> Vec<Draft> {
        let mut drafts = Vec::new();
        let mut current: Option<Range<usize>> = None;

        for unit in units {
            let fits = current
                .as_ref()
                .is_some_and(|range| input.cost(range.start..unit.end) <= input.budget);
            if fits {
                if let Some(range) = current.as_mut() {
                    range.end = unit.end;
                }
                continue;
            }
            if let Some(range) = current.replace(unit.clone()) {
                drafts.push(Draft {
                    overlap_from: range.start,
                    body: range,
                    strategy,
                });
            }
        }
        if let Some(range) = current {
            drafts.push(Draft {
                overlap_from: range.start,
                body: range,
                strategy,
            });
        }
        drafts
    }

    /// Pack pieces one at a time, re-including the tail of the previous
    /// chunk's body at the start of the next.
    fn pack_with_overlap(
        &self,
        input: &Input,
        overlap: Overlap,
        strategy: ChunkStrategy,
    ) -> Vec<Draft> {
        let mut drafts = Vec::new();
        let mut overlap_from = 0;
        let mut start = 0;

        for i in 0..input.pieces.len() {
            if i > start && input.cost(overlap_from..i + 1) > input.budget {
                drafts.push(Draft {
                    overlap_from,
                    body: start..i,
                    strategy,
                });
                overlap_from = self.overlap_start(input, &overlap, start..i);
                start = i;
            }
        }
        if start < input.pieces.len() {
            drafts.push(Draft {
                overlap_from,
                body: start..input.pieces.len(),
                strategy,
            });
        }
        drafts
    }

    /// First piece of the overlap taken from `previous`, shrunk until the
    /// overlap plus the piece after `previous` fits the budget
    fn overlap_start(&self, input: &Input, overlap: &Overlap, previous: Range<usize>) -> usize {
        let mut from = match *overlap {
            Overlap::Lines(n) => previous.end - n.min(previous.len()),
            Overlap::Chars(max_chars) => {
                let mut from = previous.end;
                let mut chars = 0;
                while from > previous.start {
                    let len = input.tally(from - 1..from).chars;
                    if chars + len > max_chars {
                        break;
                    }
                    chars += len;
                    from -= 1;
                }
                from
            }
        };
        while from < previous.end && input.cost(from..previous.end + 1) > input.budget {
            from += 1;
        }
        from
    }

    fn finish(&self, file_id: &str, input: &Input, drafts: Vec<Draft>) -> Vec<Chunk> {
        let count = drafts.len();
        let mut chunks = Vec::with_capacity(count);

        for (index, draft) in drafts.iter().enumerate() {
            let full = draft.overlap_from..draft.body.end;
            let content = input.text(full.clone()).to_string();
            let overlap_len =
                input.pieces[draft.body.start].start - input.pieces[draft.overlap_from].start;
            let overlap_with_next = drafts
                .get(index + 1)
                .is_some_and(|next| next.overlap_from < next.body.start);

            chunks.push(Chunk {
                metadata: ChunkMetadata {
                    id: format!("{}#{:04}", file_id, index),
                    file_id: file_id.to_string(),
                    index,
                    start_line: input.pieces[draft.body.start].line,
                    end_line: input.pieces[draft.body.end - 1].line,
                    estimated_tokens: self.estimator.estimate(&content, input.kind),
                    content_kind: input.kind,
                    strategy: draft.strategy,
                    overlap_lines: draft.body.start - draft.overlap_from,
                    overlap_len,
                    overlap_with_previous: draft.overlap_from < draft.body.start,
                    overlap_with_next,
                },
                content,
            });
        }
        chunks
    }
}

/// Markdown by sections; code by classes, then functions, then lines;
/// everything else by tokens
fn select_strategy(lines: &[&str], kind: ContentKind, lang: Language) -> ChunkStrategy {
    match kind {
        ContentKind::Markdown => ChunkStrategy::Sections,
        ContentKind::Code => {
            if !boundaries::find_classes(lines, lang).is_empty() {
                ChunkStrategy::Classes
            } else if !boundaries::find_functions(lines, lang).is_empty() {
                ChunkStrategy::Functions
            } else {
                ChunkStrategy::Lines
            }
        }
        _ => ChunkStrategy::Tokens,
    }
}

fn whole_lines(lines: &[&str]) -> Vec<Piece> {
    let mut offset = 0;
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let piece = Piece {
                start: offset,
                end: offset + line.len(),
                line: i + 1,
            };
            offset += line.len();
            piece
        })
        .collect()
}

/// Character cap for one fragment so a single piece stays near the budget
fn fragment_chars(budget: usize, kind: ContentKind) -> usize {
    ((budget as f64 * kind.chars_per_token() * 0.8) as usize).max(1)
}

/// Whole lines, with any line longer than `max_chars` cut on char boundaries
fn fragment_lines(lines: &[&str], max_chars: usize) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut offset = 0;
    for (i, line) in lines.iter().enumerate() {
        let mut piece_start = 0;
        let mut chars = 0;
        for (pos, _) in line.char_indices() {
            if chars == max_chars {
                pieces.push(Piece {
                    start: offset + piece_start,
                    end: offset + pos,
                    line: i + 1,
                });
                piece_start = pos;
                chars = 0;
            }
            chars += 1;
        }
        pieces.push(Piece {
            start: offset + piece_start,
            end: offset + line.len(),
            line: i + 1,
        });
        offset += line.len();
    }
    pieces
}
