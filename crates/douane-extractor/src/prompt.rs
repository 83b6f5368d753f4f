//! Page-scoped prompts
//!
//! The wording only has to make the model return the JSON shapes read by
//! [`crate::rows`] and [`crate::legal`].

use douane_domain::RowContext;

const TARIFF_INSTRUCTIONS: &str = r#"You are reading one page of a customs tariff schedule.
Extract every tariff row, every HS code mentioned and every note printed on the page.

Rules:
- Copy codes exactly as printed. Never invent, pad or complete a code.
- A row that continues its parent (no code printed) must leave national_code and hs_code_6 empty.
- col2 and col3 are the two 2-digit national columns printed after the 6-digit position.
- duty_rate is the rate column as printed (e.g. "2,5", "17,5 (a)"); unit_norm and unit_comp are the unit columns.
- note_type is one of: chapter_note, section_note, definition, footnote, exclusion, remark."#;

const TARIFF_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{
  "tariff_lines": [
    {"national_code": "", "hs_code_6": "", "col2": "", "col3": "", "description": "",
     "duty_rate": "", "unit_norm": "", "unit_comp": "", "evidence": ""}
  ],
  "hs_codes": [{"code": "", "description": ""}],
  "notes": [{"note_type": "", "anchor": "", "note_text": ""}],
  "summary": ""
}"#;

const LEGAL_INSTRUCTIONS: &str = r#"You are reading one page of a customs regulation.
Transcribe the legal text of the page faithfully, keeping article headings and paragraph breaks.
List every harmonized-system code cited in the text."#;

const LEGAL_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{"text": "", "hs_codes": [""]}"#;

/// Builds the prompt for one tariff page
pub struct PromptBuilder {
    page: u32,
    total_pages: u32,
    context: Option<RowContext>,
}

impl PromptBuilder {
    /// Create a prompt for `page` of a document of `total_pages`
    pub fn new(page: u32, total_pages: u32) -> Self {
        Self {
            page,
            total_pages,
            context: None,
        }
    }

    /// Tell the model which row the previous page ended on
    pub fn with_context(mut self, context: Option<&RowContext>) -> Self {
        self.context = context.filter(|c| c.hs_code_6.is_some()).cloned();
        self
    }

    /// Build the complete tariff prompt
    pub fn build(&self) -> String {
        let mut prompt = String::new();
        prompt.push_str(TARIFF_INSTRUCTIONS);
        prompt.push_str("\n\n");
        prompt.push_str(&format!(
            "Only read page {} of {}. Ignore every other page of the attached document.\n",
            self.page, self.total_pages
        ));

        if let Some(context) = &self.context {
            prompt.push_str("The previous page ended inside this entry:\n");
            if let Some(code) = &context.national_code {
                prompt.push_str(&format!("- national code: {}\n", code));
            }
            if let Some(pos6) = &context.hs_code_6 {
                prompt.push_str(&format!("- HS position: {}\n", pos6));
            }
            if let Some(description) = &context.description {
                prompt.push_str(&format!("- description: {}\n", description));
            }
        }

        prompt.push('\n');
        prompt.push_str(TARIFF_FORMAT);
        prompt
    }
}

/// Build the prompt for one page of a legal document
pub fn legal_page_prompt(page: u32, total_pages: u32) -> String {
    format!(
        "{}\n\nOnly read page {} of {}. Ignore every other page of the attached document.\n\n{}",
        LEGAL_INSTRUCTIONS, page, total_pages, LEGAL_FORMAT
    )
}
