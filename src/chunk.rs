//! Token-budgeted, overlapping text chunker.
//!
//! Splits an entity's searchable text into [`Chunk`]s in three steps:
//!
//! 1. **Blocks.** The text is cut into structural blocks. In markdown mode
//!    fenced code blocks are atomic, ATX headings and horizontal rules stand
//!    alone, consecutive table rows are grouped and blank lines separate
//!    paragraphs. In plain mode blocks are blank-line paragraphs, falling back
//!    to sentences when the text has no blank lines. [`ChunkMode::Auto`]
//!    picks markdown when the text contains a code fence or a heading.
//! 2. **Packing.** Blocks are packed greedily until the next block would
//!    exceed `max_tokens`. A single block larger than the budget is
//!    hard-sliced by character count, cutting at sentence ends when possible.
//! 3. **Overlap.** Roughly `overlap_tokens` of trailing text (never more
//!    than half of the window) is carried into the head of the next window.
//!
//! Tokens are estimated from character count, so the budget is approximate
//! but monotonic in text length. Chunk ids hash the source id, the order and
//! the content hash, so identical input always yields identical ids.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Approximate chars-per-token ratio. Kept on the low side so code-heavy
/// READMEs do not overrun the embedding model's context.
pub const CHARS_PER_TOKEN: usize = 3;

/// Block-splitting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    #[default]
    Auto,
    Markdown,
    Plain,
}

#[derive(Debug, Clone)]
pub struct ChunkOptions {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub mode: ChunkMode,
    /// Copied onto every produced chunk.
    pub meta: BTreeMap<String, String>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            overlap_tokens: 48,
            mode: ChunkMode::Auto,
            meta: BTreeMap::new(),
        }
    }
}

impl ChunkOptions {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_tokens,
            overlap_tokens,
            ..Self::default()
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            overlap_tokens: config.overlap_tokens,
            mode: config.mode,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.meta.insert(key.to_string(), value.to_string());
        self
    }
}

/// Estimate the token count of `text`. Newlines cost a little extra.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count() as f64;
    let newlines = text.matches('\n').count() as f64;
    (((chars + newlines * 0.25) / CHARS_PER_TOKEN as f64).ceil() as usize).max(1)
}

/// Split text into overlapping chunks. Empty input yields no chunks.
pub fn chunk_text(source_id: &str, text: &str, options: &ChunkOptions) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let max_tokens = options.max_tokens.max(1);
    let overlap_tokens = options.overlap_tokens.min(max_tokens - 1);

    let (raw_blocks, joiner) = split_blocks(text, options.mode);
    let blocks = layout(raw_blocks, joiner);
    let windows = pack(&blocks, joiner, max_tokens, overlap_tokens);

    windows
        .into_iter()
        .enumerate()
        .map(|(order, window)| make_chunk(source_id, order as i64, window, &options.meta))
        .collect()
}

// ============ Blocks ============

fn split_blocks(text: &str, mode: ChunkMode) -> (Vec<String>, &'static str) {
    let markdown = match mode {
        ChunkMode::Markdown => true,
        ChunkMode::Plain => false,
        ChunkMode::Auto => looks_like_markdown(text),
    };
    if markdown {
        return (split_markdown_blocks(text), "\n\n");
    }

    let paragraphs = split_paragraphs(text);
    if paragraphs.len() > 1 {
        return (paragraphs, "\n\n");
    }
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        (paragraphs, "\n\n")
    } else {
        (sentences, " ")
    }
}

fn looks_like_markdown(text: &str) -> bool {
    text.contains("```") || text.lines().any(is_heading)
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return false;
    }
    let rest = &trimmed[hashes..];
    rest.starts_with([' ', '\t']) && !rest.trim().is_empty()
}

fn is_rule(line: &str) -> bool {
    let trimmed = line.trim();
    ['-', '*', '_'].iter().any(|&marker| {
        trimmed.len() >= 3 && trimmed.chars().all(|c| c == marker)
    })
}

fn is_table_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 2 && trimmed.starts_with('|') && trimmed.ends_with('|')
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Collapse runs of spaces and tabs, then trim.
fn normalize_ws(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if c == ' ' || c == '\t' {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out.trim().to_string()
}

fn flush_lines(lines: &mut Vec<&str>, blocks: &mut Vec<String>, normalize: bool) {
    if lines.is_empty() {
        return;
    }
    let joined = lines.join("\n");
    let block = if normalize {
        normalize_ws(&joined)
    } else {
        joined.trim_end().to_string()
    };
    if !block.trim().is_empty() {
        blocks.push(block);
    }
    lines.clear();
}

/// Markdown-aware block split.
pub fn split_markdown_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut table: Vec<&str> = Vec::new();
    let mut fence: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if in_fence {
            fence.push(line);
            if is_fence(line) {
                in_fence = false;
                flush_lines(&mut fence, &mut blocks, false);
            }
            continue;
        }
        if is_fence(line) {
            flush_lines(&mut paragraph, &mut blocks, true);
            flush_lines(&mut table, &mut blocks, false);
            in_fence = true;
            fence.push(line);
            continue;
        }
        if is_table_line(line) {
            flush_lines(&mut paragraph, &mut blocks, true);
            table.push(line.trim());
            continue;
        }
        flush_lines(&mut table, &mut blocks, false);

        if is_heading(line) || is_rule(line) {
            flush_lines(&mut paragraph, &mut blocks, true);
            blocks.push(normalize_ws(line));
            continue;
        }
        if line.trim().is_empty() {
            flush_lines(&mut paragraph, &mut blocks, true);
            continue;
        }
        paragraph.push(line);
    }

    // An unterminated fence keeps everything after it.
    flush_lines(&mut fence, &mut blocks, false);
    flush_lines(&mut table, &mut blocks, false);
    flush_lines(&mut paragraph, &mut blocks, true);
    blocks
}

fn split_paragraphs(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(normalize_ws)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Indices just past each sentence terminator and its trailing whitespace.
fn sentence_ends(chars: &[char]) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if !matches!(chars[i], '.' | '!' | '?') {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && matches!(chars[j], '.' | '!' | '?') {
            j += 1;
        }
        while j < chars.len() && matches!(chars[j], '"' | '\'' | ')' | ']' | '”' | '’') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_whitespace() && !is_initial(chars, i) {
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            ends.push(j);
        }
        i = j;
    }
    ends
}

/// `J. Smith` style initials do not end a sentence.
fn is_initial(chars: &[char], dot: usize) -> bool {
    chars[dot] == '.'
        && dot >= 1
        && chars[dot - 1].is_uppercase()
        && (dot == 1 || !chars[dot - 2].is_alphanumeric())
}

/// Sentence segmentation used when plain text has no blank lines.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    for end in sentence_ends(&chars).into_iter().chain(std::iter::once(chars.len())) {
        if end <= start {
            continue;
        }
        let sentence = normalize_ws(&chars[start..end].iter().collect::<String>());
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = end;
    }
    sentences
}

// ============ Packing ============

#[derive(Debug, Clone)]
struct Block {
    text: String,
    start: usize,
    end: usize,
    tokens: usize,
}

#[derive(Debug, Clone)]
struct Window {
    text: String,
    start: usize,
    end: usize,
}

/// Assign character offsets as if the blocks were joined with `joiner`.
fn layout(raw: Vec<String>, joiner: &str) -> Vec<Block> {
    let joiner_len = joiner.chars().count();
    let mut offset = 0;
    raw.into_iter()
        .map(|text| {
            let len = text.chars().count();
            let block = Block {
                tokens: estimate_tokens(&text),
                start: offset,
                end: offset + len,
                text,
            };
            offset += len + joiner_len;
            block
        })
        .collect()
}

fn pack(blocks: &[Block], joiner: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<Window> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;
    let mut windows: Vec<Window> = Vec::new();
    let mut i = 0;

    while i < blocks.len() {
        let block = &blocks[i];

        if block.tokens > max_tokens {
            let carry = windows.last().and_then(|w| carry_tail(w, overlap_tokens));
            let (text, start) = match carry {
                Some(c) => (format!("{}{}{}", c.text, joiner, block.text), c.start),
                None => (block.text.clone(), block.start),
            };
            for (piece, offset) in slice_hard(&text, max_chars, overlap_chars) {
                let len = piece.chars().count();
                windows.push(Window {
                    text: piece,
                    start: start + offset,
                    end: start + offset + len,
                });
            }
            i += 1;
            continue;
        }

        // The carried tail must leave room for the first new block.
        let room = overlap_tokens.min(max_tokens.saturating_sub(block.tokens));
        let carry = windows.last().and_then(|w| carry_tail(w, room));

        let mut parts: Vec<&str> = Vec::new();
        let mut tokens = 0;
        let mut start = block.start;
        if let Some(c) = &carry {
            parts.push(&c.text);
            tokens += estimate_tokens(&c.text);
            start = c.start;
        }

        let mut j = i;
        while j < blocks.len() {
            let next = &blocks[j];
            if next.tokens > max_tokens || (j > i && tokens + next.tokens > max_tokens) {
                break;
            }
            parts.push(&next.text);
            tokens += next.tokens;
            j += 1;
        }

        windows.push(Window {
            text: parts.join(joiner),
            start,
            end: blocks[j - 1].end,
        });
        i = j;
    }

    windows
}

/// Trailing text of `window` worth about `overlap_tokens`, starting on a
/// word boundary.
fn carry_tail(window: &Window, overlap_tokens: usize) -> Option<Window> {
    let back_tokens = overlap_tokens.min(estimate_tokens(&window.text) / 2);
    if back_tokens == 0 {
        return None;
    }
    let back_chars = back_tokens * CHARS_PER_TOKEN;
    let chars: Vec<char> = window.text.chars().collect();
    if back_chars >= chars.len() {
        return None;
    }

    let mut cut = chars.len() - back_chars;
    if cut > 0 && !chars[cut - 1].is_whitespace() {
        if let Some(pos) = chars[cut..].iter().position(|c| c.is_whitespace()) {
            cut += pos;
        }
    }
    let tail = chars[cut..].iter().collect::<String>().trim().to_string();
    if tail.is_empty() {
        return None;
    }
    let tail_len = tail.chars().count();
    Some(Window {
        start: window.end.saturating_sub(tail_len),
        end: window.end,
        text: tail,
    })
}

/// Cut an oversized block into overlapping pieces of at most `max_chars`
/// characters. Returns each piece with its character offset.
fn slice_hard(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<(String, usize)> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return vec![(text.trim().to_string(), 0)];
    }

    let mut pieces = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let mut end = (i + max_chars).min(chars.len());
        if end < chars.len() {
            let half = (end - i) / 2;
            let window = &chars[i..end];
            let cut = sentence_ends(window)
                .last()
                .copied()
                .filter(|&c| c > half)
                .or_else(|| {
                    window
                        .iter()
                        .rposition(|c| c.is_whitespace())
                        .map(|p| p + 1)
                        .filter(|&c| c > half)
                });
            if let Some(cut) = cut {
                end = i + cut;
            }
        }

        let raw: String = chars[i..end].iter().collect();
        let leading = raw.chars().take_while(|c| c.is_whitespace()).count();
        let piece = raw.trim().to_string();
        if !piece.is_empty() {
            pieces.push((piece, i + leading));
        }
        if end >= chars.len() {
            break;
        }

        let step_back = end.saturating_sub(overlap_chars);
        i = step_back.max(i + (end - i + 1) / 2);
    }
    pieces
}

fn make_chunk(
    source_id: &str,
    order: i64,
    window: Window,
    meta: &BTreeMap<String, String>,
) -> Chunk {
    let content_hash = format!("{:x}", Sha256::digest(window.text.as_bytes()));

    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(order.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(content_hash.as_bytes());
    let uid = format!("{:x}", hasher.finalize());

    Chunk {
        uid,
        order,
        tokens_est: estimate_tokens(&window.text),
        text: window.text,
        start_char: window.start,
        end_char: window.end,
        meta: meta.clone(),
    }
}
