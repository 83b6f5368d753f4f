//! Text chunking strategies for legal pages
//!
//! Sizes are counted in characters, never bytes, so accented French and
//! Arabic text is never cut inside a code point.

use crate::config::ChunkStrategy;
use regex::Regex;
use std::sync::LazyLock;

static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(#+\s|article\s+\d|art\.\s*\d|chapitre\s|chapter\s|section\s|titre\s|title\s|\d+(\.\d+)*[.)]\s)",
    )
    .expect("section header pattern should compile")
});

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Chunks text according to the configured strategy
pub struct TextChunker {
    strategy: ChunkStrategy,
    max_chunk_size: usize,
}

impl TextChunker {
    /// Create a new text chunker
    pub fn new(strategy: ChunkStrategy, max_chunk_size: usize) -> Self {
        Self {
            strategy,
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    /// Chunk the given text, dropping blank chunks
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.max_chunk_size {
            return vec![text.to_string()];
        }

        let chunks = match self.strategy {
            ChunkStrategy::ByParagraph => self.chunk_by_paragraph(text),
            ChunkStrategy::BySection => self.chunk_by_section(text),
            ChunkStrategy::ByTokenCount => self.chunk_by_token_count(text),
        };
        chunks.into_iter().filter(|c| !c.trim().is_empty()).collect()
    }

    /// Chunk by paragraphs (blank lines)
    fn chunk_by_paragraph(&self, text: &str) -> Vec<String> {
        let paragraphs: Vec<&str> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        self.combine_until_limit(paragraphs)
    }

    /// Chunk by articles, chapters and numbered sections
    fn chunk_by_section(&self, text: &str) -> Vec<String> {
        let mut sections = Vec::new();
        let mut current_section = String::new();

        for line in text.lines() {
            if SECTION_HEADER.is_match(line) && !current_section.trim().is_empty() {
                sections.push(current_section.trim().to_string());
                current_section.clear();
            }
            current_section.push_str(line);
            current_section.push('\n');
        }
        if !current_section.trim().is_empty() {
            sections.push(current_section.trim().to_string());
        }

        if sections.len() <= 1 {
            self.chunk_by_paragraph(text)
        } else {
            self.combine_until_limit(sections)
        }
    }

    /// Chunk at sentence boundaries up to the size limit
    fn chunk_by_token_count(&self, text: &str) -> Vec<String> {
        let sentences: Vec<&str> = text
            .split_inclusive(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut chunks = Vec::new();
        let mut current_chunk = String::new();

        for sentence in sentences {
            let needed = char_len(&current_chunk) + char_len(sentence) + 1;
            if needed > self.max_chunk_size && !current_chunk.is_empty() {
                chunks.push(current_chunk.trim().to_string());
                current_chunk.clear();
            }
            if char_len(sentence) > self.max_chunk_size {
                chunks.extend(self.split_at_char_limit(sentence));
            } else {
                current_chunk.push_str(sentence);
                current_chunk.push(' ');
            }
        }
        if !current_chunk.trim().is_empty() {
            chunks.push(current_chunk.trim().to_string());
        }
        chunks
    }

    /// Combine elements until they reach the size limit
    fn combine_until_limit<S: AsRef<str>>(&self, elements: Vec<S>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current_chunk = String::new();

        for element in elements {
            let element = element.as_ref();
            let needed = char_len(&current_chunk) + char_len(element);
            if needed > self.max_chunk_size && !current_chunk.is_empty() {
                chunks.push(current_chunk.trim().to_string());
                current_chunk.clear();
            }
            if char_len(element) > self.max_chunk_size {
                chunks.extend(self.split_at_char_limit(element));
            } else {
                current_chunk.push_str(element);
                current_chunk.push_str("\n\n");
            }
        }
        if !current_chunk.trim().is_empty() {
            chunks.push(current_chunk.trim().to_string());
        }
        chunks
    }

    /// Split text every `max_chunk_size` characters
    fn split_at_char_limit(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.max_chunk_size)
            .map(|piece| piece.iter().collect())
            .collect()
    }
}
