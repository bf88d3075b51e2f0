//! Text chunking for ingestion.
//!
//! Splits text into windows of at most `chunk_size` characters, with
//! `overlap` characters shared between neighbours. A window prefers to end
//! on a paragraph break, then a line break, then a space, as long as that
//! keeps it at least half full.

/// Character-based splitter with overlap.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    /// `overlap` is clamped below `chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let hard_end = (start + self.chunk_size).min(chars.len());
            let end = if hard_end == chars.len() {
                hard_end
            } else {
                self.break_point(&chars[start..hard_end]).map_or(hard_end, |b| start + b)
            };

            let chunk: String = chars[start..end].iter().collect();
            let trimmed = chunk.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end == chars.len() {
                break;
            }
            // Always make progress, even when the overlap would rewind past `start`
            start = end.saturating_sub(self.overlap).max(start + 1);
        }

        chunks
    }

    /// Index just past the preferred separator in `window`, if one sits in
    /// its second half.
    fn break_point(&self, window: &[char]) -> Option<usize> {
        let min = window.len() / 2;
        let text: String = window.iter().collect();

        for separator in ["\n\n", "\n", " "] {
            if let Some(byte_idx) = text.rfind(separator) {
                let idx = text[..byte_idx].chars().count() + separator.chars().count();
                if idx > min {
                    return Some(idx);
                }
            }
        }
        None
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}
