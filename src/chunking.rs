//! Chunking utilities for splitting note bodies into overlapping windows.
//!
//! Bodies are split into fixed-size character windows that overlap by a
//! fixed amount, so that each window can be embedded separately. The chunk
//! index doubles as the stored `chunk_id`.

use crate::error::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Window size and overlap used by the indexing engine.
///
/// # Examples
///
/// ```
/// use notebert::chunking::{ChunkingConfig, DEFAULT_CHUNK_SIZE};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Characters shared by adjacent windows. Must be below `chunk_size`.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Distance between the starts of adjacent windows.
    pub fn step(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap).max(1)
    }
}

/// A window of text from a note body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text content.
    pub text: String,
    /// Zero-based chunk index within the note.
    pub index: usize,
    /// Byte offset where this chunk starts in the chunked text.
    pub start_offset: usize,
}

/// Chunk a note body: trims it first and yields nothing for blank bodies.
pub fn chunk_body(body: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    chunk_text(trimmed, config.chunk_size, config.overlap)
}

/// Split text into fixed-size windows stepping by `chunk_size - overlap`.
///
/// Sizes are counted in characters, never bytes, so multi-byte UTF-8
/// sequences are never split. The final window may be shorter than
/// `chunk_size`; no window is produced once the previous one reached the
/// end of the text.
///
/// # Examples
///
/// ```
/// use notebert::chunking::chunk_text;
///
/// let chunks = chunk_text("Hello, world!", 1000, 0);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello, world!");
///
/// let text = "x".repeat(1200);
/// let chunks = chunk_text(&text, 500, 50);
/// let ids: Vec<_> = chunks.iter().map(|c| c.index).collect();
/// assert_eq!(ids, vec![0, 1, 2]);
/// ```
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    if text.trim().is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let char_count = text.chars().count();

    // Build a map of char index -> byte index for O(1) lookups
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start_char = 0;

    loop {
        let end_char = (start_char + chunk_size).min(char_count);
        let start_byte = char_to_byte[start_char];
        let end_byte = char_to_byte[end_char];

        chunks.push(Chunk {
            text: text[start_byte..end_byte].to_string(),
            index: chunks.len(),
            start_offset: start_byte,
        });

        if end_char == char_count {
            break;
        }
        start_char += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 500, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].start_offset, 0);
    }

    #[test]
    fn blank_body_has_no_chunks() {
        let config = ChunkingConfig::default();
        assert!(chunk_body("", &config).is_empty());
        assert!(chunk_body("  \n\t  \n", &config).is_empty());
    }

    #[test]
    fn body_is_trimmed_before_chunking() {
        let chunks = chunk_body("\n\n  hello  \n", &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello");
    }

    #[test]
    fn twelve_hundred_chars_make_three_windows() {
        let text: String = (0..1200)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();
        let chunks = chunk_text(&text, 500, 50);

        let ids: Vec<_> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(chunks[0].text.len(), 500);
        assert_eq!(chunks[1].text.len(), 500);
        // Windows start at 0, 450 and 900.
        assert_eq!(chunks[2].start_offset, 900);
        assert_eq!(chunks[2].text.len(), 300);
        assert_eq!(&chunks[0].text[450..], &chunks[1].text[..50]);
    }

    #[test]
    fn exact_fit_has_no_trailing_window() {
        let text = "z".repeat(950);
        let chunks = chunk_text(&text, 500, 50);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text.len(), 500);
    }

    #[test]
    fn handles_emoji_and_multibyte_chars() {
        let emoji_text = "Hello 👉 world 🌍 test ".repeat(100);
        let chunks = chunk_text(&emoji_text, 200, 50);

        assert!(!chunks.is_empty());
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.text.chars().count(), 200);
        }
    }

    #[test]
    fn config_validation() {
        assert!(ChunkingConfig::default().validate().is_ok());
        let bad = ChunkingConfig {
            chunk_size: 10,
            overlap: 10,
        };
        assert!(bad.validate().is_err());
        let zero = ChunkingConfig {
            chunk_size: 0,
            overlap: 0,
        };
        assert!(zero.validate().is_err());
    }

    fn size_and_overlap() -> impl Strategy<Value = (usize, usize)> {
        (2usize..64).prop_flat_map(|size| (Just(size), 0..=size / 2))
    }

    proptest! {
        #[test]
        fn adjacent_windows_share_overlap(
            text in "[a-zé日 ]{1,400}",
            (size, overlap) in size_and_overlap(),
        ) {
            prop_assume!(!text.trim().is_empty());
            let chunks = chunk_text(&text, size, overlap);

            for pair in chunks.windows(2) {
                let left: Vec<char> = pair[0].text.chars().collect();
                let right: Vec<char> = pair[1].text.chars().collect();
                prop_assert_eq!(left.len(), size);
                prop_assert_eq!(
                    &left[left.len() - overlap..],
                    &right[..overlap]
                );
            }
        }

        #[test]
        fn chunk_count_tracks_step(
            text in "[a-z]{1,600}",
            (size, overlap) in size_and_overlap(),
        ) {
            let chunks = chunk_text(&text, size, overlap);
            let step = size - overlap;
            let expected = text.len().div_ceil(step);

            prop_assert!(chunks.len() + 1 >= expected);
            prop_assert!(chunks.len() <= expected + 1);
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
            }
        }
    }
}
