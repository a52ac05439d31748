//! Recursive Chunk Splitting
//!
//! Splits cleaned text into size-bounded, overlapping chunks. Text is first
//! split on the configured separator (a paragraph break by default) and
//! packed greedily. A piece that cannot fit is split again at sentence
//! boundaries, then at whitespace, and a word longer than the chunk size is
//! emitted on its own. Every flush seeds the next chunk with the tail of the
//! emitted one, so consecutive chunks share `chunk_overlap` characters (or
//! the whole previous chunk when it is shorter than that).
//!
//! The seed is never shortened. When a word fits the chunk size alone but
//! not after the seed, the chunk holding it exceeds `chunk_size` by up to
//! `chunk_overlap` plus one joiner. Stripping the seed from every chunk but
//! the first therefore always rebuilds the text. The one exception is an
//! oversized word, which is emitted verbatim without a seed.
//!
//! All lengths are counted in characters, not bytes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use kbassist_core::{Chunk, DocumentId, DocumentMetadata, IngestionConfig};

use crate::{IngestionError, Result};

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([.!?]+)\s+").expect("sentence pattern is valid"));

const SENTENCE_JOINER: &str = " ";
const WORD_JOINER: &str = " ";

/// Configuration for text splitting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitterConfig {
    /// Maximum characters per chunk
    pub chunk_size: usize,
    /// Characters carried from the end of one chunk into the next
    pub chunk_overlap: usize,
    /// Primary split boundary
    pub separator: String,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separator: "\n\n".to_string(),
        }
    }
}

impl From<&IngestionConfig> for SplitterConfig {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separator: config.separator.clone(),
        }
    }
}

impl SplitterConfig {
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.chunk_overlap = overlap;
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(IngestionError::ValidationError(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestionError::ValidationError(
                "chunk_overlap must be less than chunk_size".to_string(),
            ));
        }
        if self.separator.is_empty() {
            return Err(IngestionError::ValidationError(
                "separator must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Granularity {
    Separator,
    Sentence,
    Word,
}

/// Recursive, overlap-aware text splitter
#[derive(Debug, Clone)]
pub struct TextSplitter {
    config: SplitterConfig,
}

impl TextSplitter {
    pub fn new(config: SplitterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Split text into chunk strings. Empty or whitespace-only input yields no chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let mut packer = ChunkPacker::new(self.config.chunk_size, self.config.chunk_overlap);

        for part in text
            .split(self.config.separator.as_str())
            .map(str::trim)
            .filter(|part| !part.is_empty())
        {
            self.push(&mut packer, part, &self.config.separator, Granularity::Separator);
        }

        packer.finish()
    }

    /// Split a document into chunk records sharing `metadata`
    pub fn split_document(
        &self,
        document_id: &DocumentId,
        text: &str,
        metadata: &DocumentMetadata,
    ) -> Vec<Chunk> {
        let pieces = self.split_text(text);
        let total_chunks = pieces.len();

        debug!(
            document_id = %document_id,
            chunk_count = total_chunks,
            chunk_size = self.config.chunk_size,
            "Document split into chunks"
        );

        pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| Chunk {
                id: document_id.chunk_id(chunk_index),
                document_id: document_id.to_string(),
                chunk_index,
                total_chunks,
                text,
                metadata: metadata.clone(),
                embedding: None,
            })
            .collect()
    }

    fn push(&self, packer: &mut ChunkPacker, unit: &str, joiner: &str, level: Granularity) {
        if packer.try_append(unit, joiner) {
            return;
        }

        if packer.has_content() {
            packer.flush_with_overlap();
            if packer.try_append(unit, joiner) {
                return;
            }
        }

        // Too large even next to the overlap seed: descend one level.
        // The first piece keeps the outer joiner so boundaries survive.
        let (pieces, next, inner_joiner) = match level {
            Granularity::Separator => (split_sentences(unit), Granularity::Sentence, SENTENCE_JOINER),
            Granularity::Sentence => (split_words(unit), Granularity::Word, WORD_JOINER),
            Granularity::Word => {
                packer.place_word(unit, joiner);
                return;
            }
        };

        for (i, piece) in pieces.into_iter().enumerate() {
            let piece_joiner = if i == 0 { joiner } else { inner_joiner };
            self.push(packer, piece, piece_joiner, next);
        }
    }
}

/// Accumulates units into chunks and carries the overlap seed between them
struct ChunkPacker {
    chunk_size: usize,
    overlap: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
    /// False while `current` holds nothing but the overlap seed
    has_content: bool,
}

impl ChunkPacker {
    fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
            has_content: false,
        }
    }

    fn has_content(&self) -> bool {
        self.has_content
    }

    fn try_append(&mut self, unit: &str, joiner: &str) -> bool {
        let candidate = self.appended_len(unit, joiner);
        if candidate > self.chunk_size {
            return false;
        }
        self.append(unit, joiner, candidate);
        true
    }

    fn appended_len(&self, unit: &str, joiner: &str) -> usize {
        let unit_len = unit.chars().count();
        if self.current.is_empty() {
            unit_len
        } else {
            self.current_len + joiner.chars().count() + unit_len
        }
    }

    fn append(&mut self, unit: &str, joiner: &str, new_len: usize) {
        if !self.current.is_empty() {
            self.current.push_str(joiner);
        }
        self.current.push_str(unit);
        self.current_len = new_len;
        self.has_content = true;
    }

    fn flush_with_overlap(&mut self) {
        let emitted = std::mem::take(&mut self.current);
        let seed = tail_chars(&emitted, self.overlap).to_string();
        self.current_len = seed.chars().count();
        self.current = seed;
        self.chunks.push(emitted);
        self.has_content = false;
    }

    /// Place an indivisible word that did not fit after the current seed.
    ///
    /// A word longer than `chunk_size` becomes a chunk of its own, verbatim
    /// and unseeded, and the chunk after it is seeded with the word's tail.
    /// Any other word keeps the whole seed, so that one chunk may run past
    /// `chunk_size` by at most the seed plus the joiner.
    fn place_word(&mut self, word: &str, joiner: &str) {
        if word.chars().count() > self.chunk_size {
            self.chunks.push(word.to_string());
            self.current = tail_chars(word, self.overlap).to_string();
            self.current_len = self.current.chars().count();
            self.has_content = false;
            return;
        }

        let new_len = self.appended_len(word, joiner);
        self.append(word, joiner, new_len);
    }

    fn finish(mut self) -> Vec<String> {
        if self.has_content {
            self.chunks.push(std::mem::take(&mut self.current));
        }
        self.chunks
    }
}

/// Last `n` characters of `text`
fn tail_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    text.char_indices()
        .nth(count - n)
        .map(|(offset, _)| &text[offset..])
        .unwrap_or("")
}

/// Split after terminal punctuation followed by whitespace, keeping the punctuation
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for caps in SENTENCE_END.captures_iter(text) {
        let (Some(whole), Some(punctuation)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let sentence = text[start..punctuation.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = whole.end();
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

fn split_words(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> TextSplitter {
        TextSplitter::new(
            SplitterConfig::default()
                .with_chunk_size(chunk_size)
                .with_overlap(chunk_overlap),
        )
        .unwrap()
    }

    fn char_len(text: &str) -> usize {
        text.chars().count()
    }

    /// Oversized words come back verbatim, so they hold no whitespace
    fn is_oversized_word(chunk: &str, chunk_size: usize) -> bool {
        char_len(chunk) > chunk_size && !chunk.contains(char::is_whitespace)
    }

    /// Rebuild the source by dropping each chunk's seed, the tail of the
    /// chunk before it. Oversized words carry no seed and follow a space.
    fn reconstruct(chunks: &[String], chunk_size: usize, overlap: usize) -> String {
        let mut text = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                text.push_str(chunk);
            } else if is_oversized_word(chunk, chunk_size) {
                text.push(' ');
                text.push_str(chunk);
            } else {
                let seed_len = overlap.min(char_len(&chunks[i - 1]));
                text.extend(chunk.chars().skip(seed_len));
            }
        }
        text
    }

    fn assert_overlap(chunks: &[String], chunk_size: usize, overlap: usize) {
        for pair in chunks.windows(2) {
            if is_oversized_word(&pair[1], chunk_size) {
                continue;
            }
            let tail = tail_chars(&pair[0], overlap);
            assert!(
                pair[1].starts_with(tail),
                "chunk {:?} does not start with tail {:?}",
                pair[1],
                tail
            );
        }
    }

    /// Checks the size bound, the overlap prefix and exact reconstruction
    fn assert_split_properties(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
        let chunks = splitter(chunk_size, overlap).split_text(text);
        let limit = chunk_size + overlap + "\n\n".len();

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(
                is_oversized_word(chunk, chunk_size) || char_len(chunk) <= limit,
                "chunk of {} chars exceeds {}: {:?}",
                char_len(chunk),
                limit,
                chunk
            );
        }
        assert_overlap(&chunks, chunk_size, overlap);
        assert_eq!(reconstruct(&chunks, chunk_size, overlap), text);
        chunks
    }

    fn policy_text() -> String {
        (0..12)
            .map(|p| {
                (0..(p % 5 + 1) * 3)
                    .map(|s| format!("Sentence {} of paragraph {} covers leave accrual rules.", s, p))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_config_validation() {
        assert!(SplitterConfig::default().validate().is_ok());
        assert!(SplitterConfig::default().with_chunk_size(0).validate().is_err());
        assert!(SplitterConfig::default()
            .with_chunk_size(100)
            .with_overlap(100)
            .validate()
            .is_err());
        assert!(SplitterConfig::default().with_separator("").validate().is_err());
        assert!(TextSplitter::new(SplitterConfig::default().with_overlap(5000)).is_err());
    }

    #[test]
    fn test_short_text_is_single_trimmed_chunk() {
        let splitter = splitter(1000, 200);
        let text = "  Annual leave accrues at 1.5 days per month.\n\nCarry-over is capped at 5 days.  ";

        let chunks = splitter.split_text(text);
        assert_eq!(chunks, vec![text.trim().to_string()]);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let splitter = splitter(100, 10);
        assert!(splitter.split_text("").is_empty());
        assert!(splitter.split_text("   \n\n  \t \n\n").is_empty());
    }

    #[test]
    fn test_three_paragraph_document() {
        let p1 = "p".repeat(900);
        let mut sentences: Vec<String> = (0..6).map(|_| format!("{}.", "s".repeat(112))).collect();
        sentences.push(format!("{}.", "u".repeat(113)));
        sentences.push(format!("{}.", "v".repeat(98)));
        let p2 = sentences.join(" ");
        let p3 = "t".repeat(698);
        let text = format!("{}\n\n{}\n\n{}", p1, p2, p3);

        assert_eq!(text.len(), 2500);
        assert_eq!(&text[900..902], "\n\n");
        assert_eq!(&text[1800..1802], "\n\n");

        let chunks = splitter(1000, 200).split_text(&text);

        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 1000);
        }
        assert_eq!(chunks[0], p1);
        assert!(chunks[1].starts_with(tail_chars(&chunks[0], 200)));
        assert_eq!(reconstruct(&chunks, 1000, 200), text);
    }

    #[test]
    fn test_size_bound_overlap_and_coverage() {
        let text = policy_text();
        let chunks = assert_split_properties(&text, 120, 30);

        assert!(chunks.len() > 10);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 120, "chunk too long: {}", char_len(chunk));
        }
    }

    #[test]
    fn test_word_level_fallback() {
        let text = vec!["alpha"; 60].join(" ");
        let chunks = assert_split_properties(&text, 50, 10);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 50);
        }
    }

    #[test]
    fn test_oversized_word_emitted_alone() {
        let giant = "x".repeat(75);
        let text = format!("short words before {} and after", giant);
        let chunks = assert_split_properties(&text, 30, 5);

        assert_eq!(
            chunks,
            vec![
                "short words before".to_string(),
                giant.clone(),
                "xxxxx and after".to_string(),
            ]
        );
    }

    #[test]
    fn test_word_too_long_for_seed_keeps_full_overlap() {
        let text = format!("{}\n\n{}", "a".repeat(20), "b".repeat(95));
        let chunks = assert_split_properties(&text, 100, 30);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(20));
        assert!(chunks[1].starts_with(&chunks[0]));
        assert_eq!(char_len(&chunks[1]), 117);
    }

    #[test]
    fn test_long_words_use_overlap_slack() {
        let text = (b'a'..=b'f')
            .map(|c| char::from(c).to_string().repeat(45))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = assert_split_properties(&text, 60, 20);

        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks[0], "a".repeat(45));
        for chunk in &chunks[1..] {
            assert_eq!(char_len(chunk), 66);
        }
    }

    #[test]
    fn test_chunks_shorter_than_overlap() {
        let text = ["one", "two", "three", "four", "five", "six"].join("\n\n");
        let chunks = assert_split_properties(&text, 12, 10);

        assert_eq!(chunks[0], "one\n\ntwo");
        assert!(char_len(&chunks[0]) < 10);
        assert!(chunks[1].starts_with(&chunks[0]));
    }

    #[test]
    fn test_mixed_fallbacks_rebuild_source() {
        let url = format!("https://intranet.example.com/{}", "p".repeat(70));
        let text = [
            "Leave requests go to your manager.".to_string(),
            format!("{} {} {}", "m".repeat(40), "n".repeat(38), "o".repeat(41)),
            format!("See {} for details.", url),
            "ok".to_string(),
        ]
        .join("\n\n");
        let chunks = assert_split_properties(&text, 50, 15);

        assert!(chunks.contains(&url));
        assert!(chunks.iter().any(|c| char_len(c) > 50 && *c != url));
        assert!(chunks.last().unwrap().ends_with("for details.\n\nok"));
    }

    #[test]
    fn test_multibyte_text_counts_characters() {
        let text = vec!["café señor naïve"; 20].join(". ");
        let chunks = splitter(40, 8).split_text(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(chunk) <= 40);
        }
        assert_overlap(&chunks, 40, 8);
    }

    #[test]
    fn test_split_document_assigns_stable_ids() {
        let splitter = splitter(120, 30);
        let document_id = DocumentId::parse("doc_00aa11bb22cc").unwrap();
        let metadata = DocumentMetadata {
            title: "Leave Policy".to_string(),
            ..Default::default()
        };
        let text = policy_text();

        let first = splitter.split_document(&document_id, &text, &metadata);
        let second = splitter.split_document(&document_id, &text, &metadata);

        let ids: Vec<_> = first.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, second.iter().map(|c| c.id.clone()).collect::<Vec<_>>());
        assert_eq!(ids[0], "doc_00aa11bb22cc_chunk_0");
        assert_eq!(ids[3], "doc_00aa11bb22cc_chunk_3");
        for (i, chunk) in first.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.total_chunks, first.len());
            assert_eq!(chunk.metadata.title, "Leave Policy");
            assert!(!chunk.has_embedding());
        }
    }

    #[test]
    fn test_sentence_split_keeps_punctuation() {
        assert_eq!(
            split_sentences("Is leave paid? Yes!  It is.\nDone"),
            vec!["Is leave paid?", "Yes!", "It is.", "Done"]
        );
    }
}
