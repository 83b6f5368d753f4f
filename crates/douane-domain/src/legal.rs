//! Embedded text chunks of regulatory documents

use serde::{Deserialize, Serialize};

/// One embedded chunk of a legal document page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalChunk {
    /// Owning document
    pub pdf_id: String,

    /// Page the text was read from (1-based)
    pub page_number: u32,

    /// Position of the chunk within its page
    pub chunk_index: u32,

    /// Chunk text
    pub content: String,

    /// Embedding vector of `content`
    pub embedding: Vec<f32>,

    /// HS codes (digits only) mentioned on the page
    #[serde(default)]
    pub detected_codes: Vec<String>,
}
