//! Row normalisation
//!
//! Turns the untrusted JSON a model produced for one tariff page into
//! validated [`TariffLine`], [`HsCodeEntry`] and [`ExtractedNote`] values.
//! Every field is type-checked before use. Rows whose codes cannot be made
//! into a strict 10/6-digit pair are rejected with a reason, never padded.

use crate::reconcile::{
    fix_rate_unit_swap, footnote_marker, is_placeholder, parse_rate, resolve_col2_col3,
    SwapDiagnostics,
};
use douane_domain::{
    normalize10_strict, normalize6_strict, ExtractedNote, HsCodeEntry, NoteType, RowContext,
    TariffLine,
};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

/// Validated content of one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageExtraction {
    /// Accepted tariff rows
    pub lines: Vec<TariffLine>,
    /// Accepted HS code mentions, unique by `code_clean`
    pub hs_codes: Vec<HsCodeEntry>,
    /// Accepted notes
    pub notes: Vec<ExtractedNote>,
    /// Rejection messages
    pub errors: Vec<String>,
    /// Free-text page summary, if the model gave one
    pub summary: Option<String>,
}

/// Read a scalar as trimmed text; numbers are accepted, empty strings are not
fn text_field(row: &Map<String, Value>, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn unit_field(value: Option<String>) -> Option<String> {
    value.filter(|u| !is_placeholder(u))
}

enum CodeResolution {
    /// A full national code, and whether it came from the carried context
    Line {
        national_code: String,
        inherited: bool,
    },
    /// A heading row with no national columns; only updates the context
    Header { hs_code_6: String },
}

/// Applies reconciliation and inheritance to the rows of consecutive pages
///
/// The normaliser keeps the context of the last accepted row so that a
/// continuation row at the top of a page inherits from the bottom of the
/// previous one.
#[derive(Debug, Clone, Default)]
pub struct RowNormalizer {
    context: RowContext,
    swaps: SwapDiagnostics,
}

impl RowNormalizer {
    /// Start from a context carried over from an earlier batch
    pub fn new(context: Option<RowContext>) -> Self {
        Self {
            context: context.unwrap_or_default(),
            swaps: SwapDiagnostics::default(),
        }
    }

    /// Context after the last row seen
    pub fn context(&self) -> &RowContext {
        &self.context
    }

    /// Swap decisions made so far
    pub fn swaps(&self) -> &SwapDiagnostics {
        &self.swaps
    }

    /// Consume the normaliser, keeping its context
    pub fn into_context(self) -> RowContext {
        self.context
    }

    /// Validate everything the model returned for `page`
    pub fn normalize_page(&mut self, page: u32, value: &Value) -> PageExtraction {
        let mut out = PageExtraction::default();

        let Some(root) = value.as_object() else {
            out.errors
                .push(format!("page {}: response is not a JSON object", page));
            return out;
        };

        out.summary = text_field(root, "summary");

        match root.get("tariff_lines") {
            Some(Value::Array(rows)) => {
                for (index, row) in rows.iter().enumerate() {
                    let Some(row) = row.as_object() else {
                        out.errors
                            .push(format!("page {}: row {} is not an object", page, index + 1));
                        continue;
                    };
                    match self.normalize_row(page, row) {
                        Ok(Some(line)) => out.lines.push(line),
                        Ok(None) => {}
                        Err(reason) => {
                            debug!(page, row = index + 1, %reason, "tariff row rejected");
                            out.errors.push(format!(
                                "page {}: row {} rejected: {}",
                                page,
                                index + 1,
                                reason
                            ));
                        }
                    }
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => out
                .errors
                .push(format!("page {}: tariff_lines is not an array", page)),
        }

        if let Some(Value::Array(codes)) = root.get("hs_codes") {
            let mut seen = HashSet::new();
            for code in codes.iter().filter_map(Value::as_object) {
                let Some(printed) = text_field(code, "code") else {
                    continue;
                };
                let description = text_field(code, "description").unwrap_or_default();
                match HsCodeEntry::from_printed(&printed, &description, page) {
                    Some(entry) => {
                        if seen.insert(entry.code_clean.clone()) {
                            out.hs_codes.push(entry);
                        }
                    }
                    None => out.errors.push(format!(
                        "page {}: hs code '{}' ignored: not a chapter, heading or subheading",
                        page, printed
                    )),
                }
            }
        }

        if let Some(Value::Array(notes)) = root.get("notes") {
            for note in notes.iter().filter_map(Value::as_object) {
                let Some(note_text) = text_field(note, "note_text") else {
                    continue;
                };
                let note_type = text_field(note, "note_type")
                    .and_then(|t| NoteType::parse(&t))
                    .unwrap_or(NoteType::Remark);
                out.notes.push(ExtractedNote {
                    note_type,
                    anchor: text_field(note, "anchor"),
                    note_text,
                    page_number: page,
                });
            }
        }

        out
    }

    fn normalize_row(
        &mut self,
        page: u32,
        row: &Map<String, Value>,
    ) -> Result<Option<TariffLine>, String> {
        let raw_rate = text_field(row, "duty_rate");
        let raw_unit = text_field(row, "unit_norm");
        let fix = fix_rate_unit_swap(raw_rate.as_deref(), raw_unit.as_deref());
        if fix.swapped {
            self.swaps
                .record(page, raw_rate.as_deref(), raw_unit.as_deref());
        }

        let description = text_field(row, "description");

        let (national_code, code_inherited) = match self.resolve_code(row)? {
            CodeResolution::Line {
                national_code,
                inherited,
            } => (national_code, inherited),
            CodeResolution::Header { hs_code_6 } => {
                self.context = RowContext {
                    hs_code_6: Some(hs_code_6),
                    national_code: None,
                    description: description.or_else(|| self.context.description.clone()),
                };
                return Ok(None);
            }
        };
        let hs_code_6 = national_code[..6].to_string();

        let (description, description_inherited) = match description {
            Some(d) => (d, false),
            None => match &self.context.description {
                Some(d) => (d.clone(), true),
                None => return Err("no description and no parent to inherit from".to_string()),
            },
        };

        let duty_note = fix.duty_rate.as_deref().and_then(footnote_marker);
        let duty_rate = fix.duty_rate.as_deref().and_then(parse_rate);

        self.context = RowContext {
            hs_code_6: Some(hs_code_6.clone()),
            national_code: Some(national_code.clone()),
            description: Some(description.clone()),
        };

        Ok(Some(TariffLine {
            national_code,
            hs_code_6,
            description,
            duty_rate,
            duty_note,
            unit_norm: unit_field(fix.unit_norm),
            unit_comp: unit_field(text_field(row, "unit_comp")),
            is_inherited: code_inherited || description_inherited,
            page_number: page,
            evidence: text_field(row, "evidence"),
        }))
    }

    fn resolve_code(&self, row: &Map<String, Value>) -> Result<CodeResolution, String> {
        let stated_pos6 = match text_field(row, "hs_code_6") {
            Some(raw) => Some(
                normalize6_strict(&raw)
                    .ok_or_else(|| format!("hs_code_6 '{}' is not 6 digits", raw))?,
            ),
            None => None,
        };

        if let Some(raw) = text_field(row, "national_code") {
            let national = normalize10_strict(&raw)
                .ok_or_else(|| format!("national_code '{}' is not 10 digits", raw))?;
            if let Some(pos6) = &stated_pos6 {
                if !national.starts_with(pos6.as_str()) {
                    return Err(format!(
                        "national_code {} does not extend hs_code_6 {}",
                        national, pos6
                    ));
                }
            }
            return Ok(CodeResolution::Line {
                national_code: national,
                inherited: false,
            });
        }

        let col2 = text_field(row, "col2");
        let col3 = text_field(row, "col3");

        let (pos6, pos6_inherited) = match (&stated_pos6, &self.context.hs_code_6) {
            (Some(p), _) => (p.clone(), false),
            (None, Some(p)) => (p.clone(), true),
            (None, None) => {
                return Err("no code and no parent to inherit from".to_string());
            }
        };

        if col2.is_none() && col3.is_none() && !pos6_inherited {
            return Ok(CodeResolution::Header { hs_code_6: pos6 });
        }

        let pair = match (&col2, &col3) {
            (Some(a), Some(b)) => resolve_col2_col3(&pos6, a, b),
            _ => None,
        };
        if let Some(pair) = pair {
            debug!(reason = %pair.reason, "sub-classification columns resolved");
            return Ok(CodeResolution::Line {
                national_code: format!("{}{}{}", pos6, pair.col2, pair.col3),
                inherited: pos6_inherited,
            });
        }

        match &self.context.national_code {
            Some(parent) if parent.starts_with(pos6.as_str()) => Ok(CodeResolution::Line {
                national_code: parent.clone(),
                inherited: true,
            }),
            _ => Err(format!(
                "sub-classification columns {:?}/{:?} invalid for {} and no parent code to inherit",
                col2.unwrap_or_default(),
                col3.unwrap_or_default(),
                pos6
            )),
        }
    }
}
