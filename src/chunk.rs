//! Sentence-respecting overlapping text chunker.
//!
//! Splits article text into segments that target a configurable token
//! budget. Splitting happens on sentence boundaries; each new chunk is
//! seeded with trailing sentences of the previous one so that context
//! survives the cut. Fenced code blocks are treated as atomic units —
//! splitting code mid-block ruins its embedding.
//!
//! Token counts are estimated at ~4 characters per token, which is accurate
//! enough for sizing and avoids a tokenizer dependency.

use once_cell::sync::Lazy;
use regex::Regex;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

static SENTENCE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+\s+").expect("static regex"));

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").expect("static regex"));

static HAS_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```|`[^`]+`").expect("static regex"));

/// Secondary split points for a single sentence that exceeds the chunk size:
/// commas, semicolons, and coordinating conjunctions.
static SECONDARY_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,;]|\s+(?:and|or|but)\s+").expect("static regex"));

/// Estimate the token count of a text span.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// One chunker output segment, before it is given an id and persisted.
#[derive(Debug, Clone)]
pub struct ChunkPiece {
    pub text: String,
    pub token_estimate: usize,
    pub has_code: bool,
}

/// An atomic accumulation unit: a sentence or an entire fenced code block.
#[derive(Debug, Clone)]
struct Unit {
    text: String,
    tokens: usize,
    is_code: bool,
}

/// Splits text into overlapping, sentence-respecting segments.
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Target chunk size in estimated tokens.
    chunk_size: usize,
    /// Tokens of trailing context carried into the next chunk.
    overlap: usize,
    /// Chunks below this size are merged into their predecessor.
    min_chunk_size: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize, min_chunk_size: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            min_chunk_size,
        }
    }

    /// Chunk raw text into ordered segments.
    ///
    /// Empty input produces zero chunks. A text shorter than the minimum
    /// chunk size yields exactly one chunk. Never panics on malformed
    /// input — if sentence segmentation yields nothing, the text is split
    /// naively at fixed size.
    pub fn chunk_text(&self, text: &str) -> Vec<ChunkPiece> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let units = segment(text);
        if units.is_empty() {
            return self.naive_split(text);
        }

        let mut chunks: Vec<ChunkPiece> = Vec::new();
        let mut current: Vec<Unit> = Vec::new();
        let mut current_tokens = 0usize;
        // How many units at the front of `current` were carried over as
        // overlap from the previous chunk.
        let mut seeded = 0usize;

        for unit in units {
            // An oversized code block becomes its own chunk, unsplit.
            if unit.is_code && unit.tokens > self.chunk_size {
                // A buffer holding only carried-over overlap is already
                // covered by the previous chunk.
                if current.len() > seeded {
                    chunks.push(make_chunk(&current));
                }
                chunks.push(make_chunk(std::slice::from_ref(&unit)));
                current.clear();
                current_tokens = 0;
                seeded = 0;
                continue;
            }

            // An oversized sentence is split on secondary punctuation.
            if !unit.is_code && unit.tokens > self.chunk_size {
                if current.len() > seeded {
                    chunks.push(make_chunk(&current));
                }
                current.clear();
                current_tokens = 0;
                seeded = 0;
                for piece in self.split_long_sentence(&unit.text) {
                    let tokens = estimate_tokens(&piece);
                    chunks.push(make_chunk(&[Unit {
                        text: piece,
                        tokens,
                        is_code: false,
                    }]));
                }
                continue;
            }

            // Close the running chunk when this unit would overflow it and
            // the chunk already meets the minimum viable size.
            if !current.is_empty()
                && current_tokens + unit.tokens > self.chunk_size
                && current_tokens >= self.min_chunk_size
            {
                chunks.push(make_chunk(&current));
                let tail = self.overlap_tail(&current);
                seeded = tail.len();
                current_tokens = tail.iter().map(|u| u.tokens).sum();
                current = tail;
            }

            current_tokens += unit.tokens;
            current.push(unit);
        }

        if !current.is_empty() {
            let fresh: Vec<Unit> = current[seeded..].to_vec();
            if !fresh.is_empty() {
                if chunks.is_empty() || current_tokens >= self.min_chunk_size {
                    chunks.push(make_chunk(&current));
                } else {
                    // Residue too small to stand alone: fold the fresh
                    // sentences into the previous chunk so no text is lost.
                    let last = chunks.last_mut().expect("chunks non-empty");
                    for unit in &fresh {
                        last.text.push(' ');
                        last.text.push_str(&unit.text);
                    }
                    last.token_estimate = estimate_tokens(&last.text);
                    last.has_code = last.has_code || fresh.iter().any(|u| u.is_code);
                }
            }
        }

        chunks
    }

    /// Walk backward over the just-closed chunk's units until the
    /// accumulated token estimate meets or exceeds the overlap target.
    /// Never seeds the entire chunk.
    fn overlap_tail(&self, closed: &[Unit]) -> Vec<Unit> {
        let mut take = 0usize;
        let mut tokens = 0usize;
        for unit in closed.iter().rev() {
            if tokens >= self.overlap || take + 1 == closed.len() {
                break;
            }
            tokens += unit.tokens;
            take += 1;
        }
        closed[closed.len() - take..].to_vec()
    }

    /// Split an oversized sentence on commas, semicolons, and coordinating
    /// conjunctions. Falls back to returning the sentence whole — it is
    /// never truncated.
    fn split_long_sentence(&self, sentence: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();

        for part in SECONDARY_SPLIT.split(sentence) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if !current.is_empty()
                && estimate_tokens(&current) + estimate_tokens(part) > self.chunk_size
            {
                pieces.push(current.clone());
                current.clear();
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(part);
        }
        if !current.is_empty() {
            pieces.push(current);
        }

        if pieces.is_empty() {
            pieces.push(sentence.to_string());
        }
        pieces
    }

    /// Last-resort splitting when sentence segmentation found nothing:
    /// fixed-size pieces cut at character boundaries.
    fn naive_split(&self, text: &str) -> Vec<ChunkPiece> {
        let max_chars = self.chunk_size * CHARS_PER_TOKEN;
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(max_chars.max(1))
            .map(|window| {
                let piece: String = window.iter().collect();
                let tokens = estimate_tokens(&piece);
                let has_code = HAS_CODE.is_match(&piece);
                ChunkPiece {
                    text: piece,
                    token_estimate: tokens,
                    has_code,
                }
            })
            .collect()
    }
}

fn make_chunk(units: &[Unit]) -> ChunkPiece {
    let text = units
        .iter()
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let token_estimate = estimate_tokens(&text);
    let has_code = units.iter().any(|u| u.is_code) || HAS_CODE.is_match(&text);
    ChunkPiece {
        text,
        token_estimate,
        has_code,
    }
}

/// Split text into accumulation units: fenced code blocks stay whole, prose
/// between them is split into sentences.
fn segment(text: &str) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut last = 0usize;

    for m in CODE_FENCE.find_iter(text) {
        push_sentences(&text[last..m.start()], &mut units);
        let code = m.as_str().trim();
        if !code.is_empty() {
            units.push(Unit {
                text: code.to_string(),
                tokens: estimate_tokens(code),
                is_code: true,
            });
        }
        last = m.end();
    }
    push_sentences(&text[last..], &mut units);

    units
}

fn push_sentences(prose: &str, units: &mut Vec<Unit>) {
    let mut start = 0usize;
    for m in SENTENCE_BOUNDARY.find_iter(prose) {
        let sentence = prose[start..m.end()].trim();
        if !sentence.is_empty() {
            units.push(Unit {
                text: sentence.to_string(),
                tokens: estimate_tokens(sentence),
                is_code: false,
            });
        }
        start = m.end();
    }
    let tail = prose[start..].trim();
    if !tail.is_empty() {
        units.push(Unit {
            text: tail.to_string(),
            tokens: estimate_tokens(tail),
            is_code: false,
        });
    }
}
