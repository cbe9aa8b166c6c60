//! Recursive, overlap-aware text splitting.
//!
//! Knowledge-base documents are split along a priority-ordered list of
//! separator patterns: section headings first, then horizontal rules, blank
//! lines, single newlines, and finally spaces. A segment that is still too
//! large for one chunk is re-split with the next separator in the list, so a
//! chunk boundary never lands mid-word while a better boundary is available
//! nearby. Segments are packed greedily into chunks of at most `chunk_size`
//! characters, and each chunk carries the tail of its predecessor as overlap
//! so that context survives the boundary.
//!
//! ```
//! use servicedesk_context::TextSplitter;
//!
//! let splitter = TextSplitter::with_defaults(500, 50);
//! let chunks = splitter.split("## Refunds\n\nRefunds are issued within 5 business days.");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].sequence, 0);
//! ```

use regex::Regex;
use serde::Serialize;
use std::ops::Range;

/// Separator patterns for knowledge-base markdown, ordered from most to
/// least significant. Text that no separator can break under the size limit
/// falls back to character-boundary splitting.
pub const DEFAULT_SEPARATORS: &[&str] = &[
    r"\n## ",  // second-level headings
    r"\n### ", // third-level headings
    r"\n---",  // horizontal rules / front-matter fences
    r"\n\n",   // paragraphs
    r"\n",     // line breaks
    r" ",      // spaces
];

/// A single chunk produced by [`TextSplitter::split`].
#[derive(Debug, Clone, Serialize)]
pub struct TextChunk {
    /// 0-based position of this chunk within the source text.
    pub sequence: usize,
    /// The chunk text, including any overlap carried from the predecessor.
    pub text: String,
    /// Byte offset of the chunk start in the source text.
    pub start: usize,
    /// Byte offset one past the chunk end in the source text.
    pub end: usize,
}

/// Splits document text into bounded, overlapping chunks.
pub struct TextSplitter {
    separators: Vec<Regex>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// Create a splitter from explicit separator patterns.
    ///
    /// Patterns are applied in order, most significant first.
    ///
    /// # Panics
    ///
    /// Panics if any pattern is not a valid regular expression, or if
    /// `chunk_overlap >= chunk_size`.
    pub fn new(separator_patterns: &[&str], chunk_size: usize, chunk_overlap: usize) -> Self {
        assert!(
            chunk_overlap < chunk_size,
            "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
        );
        let separators = separator_patterns
            .iter()
            .map(|&pattern| Regex::new(pattern).unwrap())
            .collect();
        Self {
            separators,
            chunk_size,
            chunk_overlap,
        }
    }

    /// Create a splitter with [`DEFAULT_SEPARATORS`].
    pub fn with_defaults(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self::new(DEFAULT_SEPARATORS, chunk_size, chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into chunks of at most `chunk_size` characters.
    ///
    /// Consecutive chunks share roughly `chunk_overlap` characters: when a
    /// chunk closes, the next one starts that far back in the source,
    /// snapped to a UTF-8 character boundary. The overlap shrinks only when
    /// the incoming segment would otherwise overflow the size budget.
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        let segments = self.segment(text, 0, 0);

        let mut chunks: Vec<TextChunk> = Vec::new();
        let mut start = 0usize;
        let mut end = 0usize;
        let mut open = false;

        for seg in segments {
            if !open {
                start = seg.start;
                end = seg.end;
                open = true;
                continue;
            }
            if seg.end - start > self.chunk_size && end > start {
                chunks.push(Self::make_chunk(text, chunks.len(), start, end));
                // Carry overlap into the next chunk; shrink it if the
                // incoming segment alone nearly fills the budget.
                let seg_len = seg.end - seg.start;
                let allowed = self
                    .chunk_overlap
                    .min(self.chunk_size.saturating_sub(seg_len));
                start = floor_char_boundary(text, end.saturating_sub(allowed));
            }
            end = seg.end;
        }
        if open && end > start {
            chunks.push(Self::make_chunk(text, chunks.len(), start, end));
        }

        chunks
    }

    fn make_chunk(text: &str, sequence: usize, start: usize, end: usize) -> TextChunk {
        TextChunk {
            sequence,
            text: text[start..end].to_string(),
            start,
            end,
        }
    }

    // Recursively cover `text` with byte ranges no larger than chunk_size.
    // Ranges are contiguous: concatenating them reproduces `text`.
    fn segment(&self, text: &str, separator_idx: usize, offset: usize) -> Vec<Range<usize>> {
        let mut out: Vec<Range<usize>> = Vec::new();
        if text.is_empty() {
            return out;
        }

        if text.len() <= self.chunk_size {
            out.push(offset..offset + text.len());
            return out;
        }

        // All separators exhausted: split on character boundaries.
        if separator_idx >= self.separators.len() {
            let mut local = 0;
            while local < text.len() {
                let mut stop = floor_char_boundary(text, (local + self.chunk_size).min(text.len()));
                if stop <= local {
                    stop = (local + 1..=text.len())
                        .find(|&i| text.is_char_boundary(i))
                        .unwrap_or(text.len());
                }
                out.push(offset + local..offset + stop);
                local = stop;
            }
            return out;
        }

        let separator = &self.separators[separator_idx];
        let mut cursor = 0;
        for mat in separator.find_iter(text) {
            if mat.start() > cursor {
                out.extend(self.segment(
                    &text[cursor..mat.start()],
                    separator_idx + 1,
                    offset + cursor,
                ));
            }
            // The separator itself stays in the stream so chunks reproduce
            // the source text byte-for-byte.
            out.push(offset + mat.start()..offset + mat.end());
            cursor = mat.end();
        }
        if cursor < text.len() {
            out.extend(self.segment(&text[cursor..], separator_idx + 1, offset + cursor));
        }

        out
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
