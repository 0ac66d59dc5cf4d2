//! Boundary-aware text chunker.
//!
//! Splits a document's flattened content into bounded, overlapping windows
//! according to a [`ChunkingPolicy`]. The chunker is a pure function: the
//! same `(content, policy)` always yields the same spans.
//!
//! Offsets are **char** indices (not bytes) into the content, half-open
//! `[start, end)`.
//!
//! # Character method
//!
//! 1. `candidate_end = min(start + max_chunk_chars, len)`.
//! 2. If the window reaches the end of the content it is emitted whole.
//! 3. Otherwise the window `[start, candidate_end)` is searched for, in order:
//!    - the first blank line (a line break, optional spaces or tabs, another
//!      line break); the chunk ends after the whole whitespace run;
//!    - the last `.`, `?` or `!`; the chunk ends right after it;
//!    - nothing: hard cut at `candidate_end`.
//!
//!    A boundary only counts if it ends the chunk after `start + overlap`,
//!    so every step makes progress and no chunk is empty.
//! 4. The next window starts at `end - overlap_chars`. The loop runs while
//!    `start + overlap_chars < len`.
//!
//! # Section method
//!
//! Splits at heading lines (`# Title`, `= Title =`, setext underlines) and
//! packs consecutive sections while they fit in `max_chunk_chars`. A section
//! that alone exceeds the budget is split with the character method.
//!
//! # Example
//!
//! ```rust
//! use llm_index_core::chunk::chunk_text;
//! use llm_index_core::models::ChunkingPolicy;
//!
//! let spans = chunk_text(
//!     "Hello world. This is a test.\n\nSecond paragraph here.",
//!     &ChunkingPolicy::character(30, 5),
//! )
//! .unwrap();
//! assert_eq!((spans[0].start, spans[0].end), (0, 30));
//! assert_eq!((spans[1].start, spans[1].end), (25, 52));
//! ```

use crate::error::Result;
use crate::models::{ChunkingMethod, ChunkingPolicy};

/// One chunk window over the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Splits `content` according to `policy`.
///
/// Fails only when the policy itself is invalid.
pub fn chunk_text(content: &str, policy: &ChunkingPolicy) -> Result<Vec<TextSpan>> {
    policy.validate()?;
    let chars: Vec<char> = content.chars().collect();
    let windows = match policy.method {
        ChunkingMethod::Character => {
            character_windows(&chars, policy.max_chunk_chars, policy.overlap_chars)
        }
        ChunkingMethod::Section => {
            section_windows(&chars, policy.max_chunk_chars, policy.overlap_chars)
        }
    };
    Ok(windows
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| TextSpan {
            index,
            start,
            end,
            text: chars[start..end].iter().collect(),
        })
        .collect())
}

fn character_windows(chars: &[char], max: usize, overlap: usize) -> Vec<(usize, usize)> {
    let len = chars.len();
    let mut windows = Vec::new();
    let mut start = 0;

    while start + overlap < len {
        let candidate_end = (start + max).min(len);
        let end = if candidate_end == len {
            len
        } else {
            let min_end = start + overlap + 1;
            blank_line_end(chars, start, candidate_end, min_end)
                .or_else(|| sentence_end(chars, start, candidate_end, min_end))
                .unwrap_or(candidate_end)
        };
        debug_assert!(end > start + overlap);
        windows.push((start, end));
        start = end - overlap;
    }

    windows
}

fn is_inline_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

/// End of the first blank-line run in `(start, limit)` that ends at or after `min_end`.
fn blank_line_end(chars: &[char], start: usize, limit: usize, min_end: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < limit {
        if chars[i] != '\n' {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < limit && is_inline_space(chars[j]) {
            j += 1;
        }
        if j < limit && chars[j] == '\n' {
            let mut run_end = j + 1;
            while run_end < limit && chars[run_end].is_whitespace() {
                run_end += 1;
            }
            if run_end >= min_end {
                return Some(run_end);
            }
            i = run_end;
        } else {
            i = j.max(i + 1);
        }
    }
    None
}

/// Position right after the last sentence terminal in the window.
fn sentence_end(chars: &[char], start: usize, limit: usize, min_end: usize) -> Option<usize> {
    (start..limit)
        .rev()
        .find(|&i| matches!(chars[i], '.' | '?' | '!'))
        .map(|i| i + 1)
        .filter(|&end| end >= min_end)
}

fn section_windows(chars: &[char], max: usize, overlap: usize) -> Vec<(usize, usize)> {
    let mut windows = Vec::new();
    let mut pending: Option<(usize, usize)> = None;

    for (a, b) in sections(chars) {
        if let Some((ps, _)) = pending {
            if b - ps <= max {
                pending = Some((ps, b));
                continue;
            }
            windows.extend(pending.take());
        }
        if b - a > max {
            let inner = character_windows(&chars[a..b], max, overlap);
            windows.extend(inner.into_iter().map(|(s, e)| (s + a, e + a)));
        } else {
            pending = Some((a, b));
        }
    }
    windows.extend(pending);
    windows
}

/// Tiles the content into heading-delimited sections.
fn sections(chars: &[char]) -> Vec<(usize, usize)> {
    let lines = line_spans(chars);
    let mut starts = vec![0];

    for (n, &(ls, le)) in lines.iter().enumerate() {
        let line = &chars[ls..le];
        let heading_start = if is_heading(line) {
            Some(ls)
        } else if n > 0 && is_setext_underline(line) {
            let (ps, pe) = lines[n - 1];
            let prev_blank = chars[ps..pe].iter().all(|c| c.is_whitespace());
            (!prev_blank).then_some(ps)
        } else {
            None
        };
        if let Some(s) = heading_start {
            if s > *starts.last().unwrap_or(&0) {
                starts.push(s);
            }
        }
    }

    let mut out = Vec::with_capacity(starts.len());
    for (i, &s) in starts.iter().enumerate() {
        let e = starts.get(i + 1).copied().unwrap_or(chars.len());
        if e > s {
            out.push((s, e));
        }
    }
    out
}

/// Line ranges excluding the line break.
fn line_spans(chars: &[char]) -> Vec<(usize, usize)> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &c) in chars.iter().enumerate() {
        if c == '\n' {
            lines.push((start, i));
            start = i + 1;
        }
    }
    if start < chars.len() {
        lines.push((start, chars.len()));
    }
    lines
}

fn is_heading(line: &[char]) -> bool {
    let trimmed: String = line.iter().collect();
    let trimmed = trimmed.trim();
    if let Some(rest) = trimmed.strip_prefix('#') {
        let rest = rest.trim_start_matches('#');
        let level = trimmed.len() - rest.len();
        return level <= 6 && rest.starts_with(' ');
    }
    if trimmed.starts_with('=') && trimmed.ends_with('=') {
        let inner = trimmed.trim_matches('=');
        return !inner.trim().is_empty() && inner.starts_with(' ');
    }
    false
}

fn is_setext_underline(line: &[char]) -> bool {
    let trimmed: String = line.iter().collect();
    let trimmed = trimmed.trim();
    trimmed.len() >= 3 && (trimmed.chars().all(|c| c == '=') || trimmed.chars().all(|c| c == '-'))
}
