//! Recursive character text splitter.
//!
//! Splits page text into overlapping windows that respect a `chunk_size`
//! limit measured in characters (Unicode scalar values, not bytes).
//!
//! # Algorithm
//!
//! 1. Pick the first separator from `"\n\n"`, `"\n"`, `" "`, `""` that occurs
//!    in the text (the empty separator always matches and means "split
//!    into characters").
//! 2. Split on it and drop empty pieces.
//! 3. Pieces shorter than `chunk_size` are buffered; a piece that is too
//!    long flushes the buffer and is split again with the remaining, finer
//!    separators.
//! 4. Buffered pieces are merged back into windows joined by the separator.
//!    When a window is full it is emitted, and pieces are dropped from its
//!    front until at most `chunk_overlap` characters remain. Those carry
//!    over as the start of the next window.
//!
//! # Example
//!
//! ```rust
//! use paper_chat_core::chunk::RecursiveSplitter;
//!
//! let splitter = RecursiveSplitter::new(1000, 200).unwrap();
//! let chunks = splitter.split_text("First paragraph.\n\nSecond paragraph.");
//! assert_eq!(chunks, vec!["First paragraph.\n\nSecond paragraph."]);
//! ```

use std::collections::VecDeque;

use anyhow::{bail, Result};

use crate::models::{Chunk, PageText};

/// Default window length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between consecutive windows in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Separators tried in priority order.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Recursive character splitter with fixed size and overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl RecursiveSplitter {
    /// Create a splitter.
    ///
    /// # Errors
    ///
    /// Fails when `chunk_size` is zero or `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split a single text into windows.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    /// Split every page and tag the windows with their source and page.
    ///
    /// `ord` runs across the whole document starting at 0, in emission
    /// order, so page 2's first chunk follows page 1's last one.
    pub fn chunk_pages(&self, pages: &[PageText], source: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in pages {
            for text in self.split_text(&page.text) {
                chunks.push(Chunk {
                    text,
                    source: Some(source.to_string()),
                    page: Some(page.page),
                    ord: chunks.len(),
                });
            }
        }
        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = "";
        let mut finer: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                break;
            }
            if text.contains(*sep) {
                separator = *sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut out = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_on(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                out.extend(self.merge(&pending, separator));
                pending.clear();
            }
            if finer.is_empty() {
                out.push(piece.to_string());
            } else {
                out.extend(self.split_recursive(piece, finer));
            }
        }

        if !pending.is_empty() {
            out.extend(self.merge(&pending, separator));
        }
        out
    }

    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut windows = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joiner = if current.is_empty() { 0 } else { sep_len };

            if total + len + joiner > self.chunk_size && !current.is_empty() {
                push_window(&mut windows, &current, separator);

                // Shrink from the front until only the overlap is left and
                // the incoming piece fits.
                while total > self.chunk_overlap
                    || (total > 0 && total + len + joined_sep(&current, sep_len) > self.chunk_size)
                {
                    let Some(front) = current.pop_front() else {
                        break;
                    };
                    let removed = char_len(front) + joined_sep(&current, sep_len);
                    total = total.saturating_sub(removed);
                }
            }

            current.push_back(piece);
            total += len + if current.len() > 1 { sep_len } else { 0 };
        }

        push_window(&mut windows, &current, separator);
        windows
    }
}

fn joined_sep(current: &VecDeque<&str>, sep_len: usize) -> usize {
    if current.is_empty() {
        0
    } else {
        sep_len
    }
}

fn push_window(windows: &mut Vec<String>, current: &VecDeque<&str>, separator: &str) {
    let joined = current.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

/// Split on `separator`, dropping empty pieces. The empty separator splits
/// into individual characters.
fn split_on<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
