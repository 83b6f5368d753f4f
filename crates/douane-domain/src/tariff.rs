//! Tariff schedule entities produced by the extraction loop

use crate::normalize::code_clean;
use serde::{Deserialize, Serialize};

/// One row of a national customs tariff schedule
///
/// `national_code` and `hs_code_6` are always strictly valid digit strings;
/// rows whose codes cannot be validated are rejected upstream instead of
/// being padded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffLine {
    /// National tariff code, exactly 10 digits
    pub national_code: String,

    /// HS subheading, exactly 6 digits (prefix of `national_code`)
    pub hs_code_6: String,

    /// Designation of the goods
    pub description: String,

    /// Import duty as a percentage
    pub duty_rate: Option<f64>,

    /// Footnote marker attached to the duty rate, e.g. "a"
    pub duty_note: Option<String>,

    /// Normal unit of quantity
    pub unit_norm: Option<String>,

    /// Complementary unit of quantity
    pub unit_comp: Option<String>,

    /// True when code or description were carried down from a parent row
    #[serde(default)]
    pub is_inherited: bool,

    /// Page the row was read from (1-based)
    pub page_number: u32,

    /// Raw text the extractor quoted as evidence for the row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Level of an HS code, derived from its digit count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HsLevel {
    /// 2 digits
    Chapter,

    /// 4 digits
    Heading,

    /// 6 digits
    Subheading,
}

impl HsLevel {
    /// Derive the level from a digit count; other lengths have no level
    pub fn from_digit_count(count: usize) -> Option<Self> {
        match count {
            2 => Some(HsLevel::Chapter),
            4 => Some(HsLevel::Heading),
            6 => Some(HsLevel::Subheading),
            _ => None,
        }
    }

    /// Get the level name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            HsLevel::Chapter => "chapter",
            HsLevel::Heading => "heading",
            HsLevel::Subheading => "subheading",
        }
    }

    /// Parse a level from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "chapter" => Some(HsLevel::Chapter),
            "heading" => Some(HsLevel::Heading),
            "subheading" => Some(HsLevel::Subheading),
            _ => None,
        }
    }
}

/// A harmonized-system code mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HsCodeEntry {
    /// Code as printed in the document
    pub code: String,

    /// Digits only; the deduplication key
    pub code_clean: String,

    /// Description printed next to the code
    pub description: String,

    /// Chapter, heading or subheading
    pub level: HsLevel,

    /// Page the code was read from
    pub page_number: u32,
}

impl HsCodeEntry {
    /// Build an entry from a printed code
    ///
    /// Returns `None` when the digits do not form a chapter, heading or
    /// subheading.
    ///
    /// # Examples
    ///
    /// ```
    /// use douane_domain::{HsCodeEntry, HsLevel};
    ///
    /// let entry = HsCodeEntry::from_printed("01.01", "Live horses", 3).unwrap();
    /// assert_eq!(entry.code_clean, "0101");
    /// assert_eq!(entry.level, HsLevel::Heading);
    /// assert!(HsCodeEntry::from_printed("010", "?", 3).is_none());
    /// ```
    pub fn from_printed(code: &str, description: &str, page_number: u32) -> Option<Self> {
        let clean = code_clean(code);
        let level = HsLevel::from_digit_count(clean.len())?;
        Some(Self {
            code: code.trim().to_string(),
            code_clean: clean,
            description: description.trim().to_string(),
            level,
            page_number,
        })
    }
}

/// Kind of note attached to a tariff table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    /// Legal note of a chapter
    ChapterNote,

    /// Legal note of a section
    SectionNote,

    /// Definition of a term
    Definition,

    /// Footnote referenced by a marker in the table
    Footnote,

    /// Exclusion of goods from a heading
    Exclusion,

    /// Anything else
    Remark,
}

impl NoteType {
    /// Get the note type name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteType::ChapterNote => "chapter_note",
            NoteType::SectionNote => "section_note",
            NoteType::Definition => "definition",
            NoteType::Footnote => "footnote",
            NoteType::Exclusion => "exclusion",
            NoteType::Remark => "remark",
        }
    }

    /// Parse a note type from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "chapter_note" => Some(NoteType::ChapterNote),
            "section_note" => Some(NoteType::SectionNote),
            "definition" => Some(NoteType::Definition),
            "footnote" => Some(NoteType::Footnote),
            "exclusion" => Some(NoteType::Exclusion),
            "remark" => Some(NoteType::Remark),
            _ => None,
        }
    }
}

/// A footnote, chapter note or definition attached to a tariff table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedNote {
    /// Kind of note
    pub note_type: NoteType,

    /// Reference mark, e.g. "(a)" or "1"
    pub anchor: Option<String>,

    /// Full text of the note
    pub note_text: String,

    /// Page the note was read from
    pub page_number: u32,
}
