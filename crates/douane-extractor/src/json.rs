//! Resilient JSON parsing of LLM output
//!
//! Model replies are expected to hold one JSON object but arrive wrapped in
//! markdown fences, surrounded by prose, or cut off by the token limit.
//! Strategies are tried in order:
//!
//! 1. direct parse of the whole reply
//! 2. parse of the content of a ```` ```json ```` fence
//! 3. parse of the first balanced `{...}` embedded in the text
//! 4. repair: cut back to the last complete value and close every open
//!    string, array and object
//!
//! A repaired value always goes through `serde_json` again, so success never
//! means "syntactically invalid". Fields cut by truncation are absent from the
//! result rather than present with a corrupted value.

use serde_json::Value;
use thiserror::Error;

/// Characters of the raw reply kept in a [`ParseFailure`]
pub const EXCERPT_CHARS: usize = 300;

/// Candidate cut points tried by the repair pass, latest first
const MAX_REPAIR_ATTEMPTS: usize = 32;

/// Whether the reply parsed as-is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseQuality {
    /// The reply (or its fenced/embedded part) was complete JSON
    Clean,
    /// The repair pass dropped a truncated tail
    Repaired,
}

/// Strategy that produced the value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// Whole reply
    Direct,
    /// Markdown fence content
    Fenced,
    /// First balanced object in the text
    Embedded,
    /// Truncation repair
    Repair,
}

impl ParseStrategy {
    /// Strategy name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStrategy::Direct => "direct",
            ParseStrategy::Fenced => "fenced",
            ParseStrategy::Embedded => "embedded",
            ParseStrategy::Repair => "repair",
        }
    }
}

/// A successfully parsed reply
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedJson {
    /// The parsed value
    pub value: Value,
    /// Clean or repaired
    pub quality: ParseQuality,
    /// Strategy that succeeded
    pub strategy: ParseStrategy,
    /// Expected top-level fields absent from `value`
    pub missing_fields: Vec<String>,
}

impl ParsedJson {
    /// Whether the caller should log a warning
    pub fn is_partial(&self) -> bool {
        self.quality == ParseQuality::Repaired || !self.missing_fields.is_empty()
    }
}

/// No strategy produced JSON
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unparseable LLM output (recoverable: {recoverable_fields:?}, lost: {lost_fields:?}): {excerpt}")]
pub struct ParseFailure {
    /// Beginning of the raw reply, for logs
    pub excerpt: String,
    /// Expected fields whose key appears in the text
    pub recoverable_fields: Vec<String>,
    /// Expected fields not found at all
    pub lost_fields: Vec<String>,
}

/// Parse an LLM reply into a JSON value
///
/// `expected_fields` are the top-level keys the caller needs; they drive
/// `missing_fields` and the failure report.
///
/// # Examples
///
/// ```
/// use douane_extractor::json::{parse_llm_json, ParseQuality};
///
/// let reply = "```json\n{\"tariff_lines\": []}\n```";
/// let parsed = parse_llm_json(reply, &["tariff_lines"]).unwrap();
/// assert_eq!(parsed.quality, ParseQuality::Clean);
///
/// let truncated = r#"{"summary": "ok", "notes": [{"note_text": "Sont excl"#;
/// let parsed = parse_llm_json(truncated, &["summary", "notes"]).unwrap();
/// assert_eq!(parsed.quality, ParseQuality::Repaired);
/// assert_eq!(parsed.value["summary"], "ok");
/// assert!(parsed.value.get("notes").is_none());
/// ```
pub fn parse_llm_json(raw: &str, expected_fields: &[&str]) -> Result<ParsedJson, ParseFailure> {
    let trimmed = raw.trim();

    let success = |value: Value, quality, strategy| {
        let missing_fields = missing_fields(&value, expected_fields);
        ParsedJson {
            value,
            quality,
            strategy,
            missing_fields,
        }
    };

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(success(value, ParseQuality::Clean, ParseStrategy::Direct));
    }

    let fenced = strip_fence(trimmed);
    if let Some(inner) = fenced {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return Ok(success(value, ParseQuality::Clean, ParseStrategy::Fenced));
        }
    }

    let body = fenced.unwrap_or(trimmed);
    if let Some(object) = find_balanced_object(body) {
        if let Ok(value) = serde_json::from_str::<Value>(object) {
            return Ok(success(value, ParseQuality::Clean, ParseStrategy::Embedded));
        }
    }

    if let Some(value) = repair(body) {
        return Ok(success(value, ParseQuality::Repaired, ParseStrategy::Repair));
    }

    let (recoverable_fields, lost_fields): (Vec<String>, Vec<String>) = expected_fields
        .iter()
        .map(|f| f.to_string())
        .partition(|f| body.contains(&format!("\"{}\"", f)));

    Err(ParseFailure {
        excerpt: trimmed.chars().take(EXCERPT_CHARS).collect(),
        recoverable_fields,
        lost_fields,
    })
}

fn missing_fields(value: &Value, expected: &[&str]) -> Vec<String> {
    match value.as_object() {
        Some(map) => expected
            .iter()
            .filter(|f| !map.contains_key(**f))
            .map(|f| f.to_string())
            .collect(),
        None => expected.iter().map(|f| f.to_string()).collect(),
    }
}

/// Content of the first markdown fence; an unclosed fence runs to the end
fn strip_fence(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_ticks = &text[open + 3..];
    // Skip the language tag line
    let content_start = after_ticks.find('\n').map(|i| i + 1).unwrap_or(after_ticks.len());
    let content = &after_ticks[content_start..];
    match content.find("```") {
        Some(close) => Some(&content[..close]),
        None => Some(content),
    }
}

/// First `{...}` whose braces balance, ignoring braces inside strings
fn find_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// A position where the text can be cut and closed into valid JSON
struct SafePoint {
    end: usize,
    closers: Vec<char>,
}

/// Close a truncated JSON document at its last complete value
///
/// Safe points are recorded just after the root opening bracket, after every
/// closing bracket, after every completed value string (keys excluded) and
/// after every primitive terminated by a delimiter. A primitive cut by the end
/// of input is never a safe point: `12` may have been `125`.
fn repair(text: &str) -> Option<Value> {
    let start = text.find(['{', '['])?;
    let body = &text[start..];

    let mut stack: Vec<char> = Vec::new();
    let mut safe_points: Vec<SafePoint> = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    let mut string_is_key = false;
    let mut expect_key = false;
    let mut in_primitive = false;

    for (i, c) in body.char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
                if string_is_key {
                    expect_key = false;
                } else {
                    safe_points.push(SafePoint {
                        end: i + 1,
                        closers: stack.clone(),
                    });
                }
            }
            continue;
        }

        if in_primitive {
            if matches!(c, ',' | '}' | ']') || c.is_whitespace() {
                in_primitive = false;
                safe_points.push(SafePoint {
                    end: i,
                    closers: stack.clone(),
                });
            } else {
                continue;
            }
        }

        match c {
            '{' | '[' => {
                stack.push(if c == '{' { '}' } else { ']' });
                expect_key = c == '{';
                if stack.len() == 1 {
                    safe_points.push(SafePoint {
                        end: i + 1,
                        closers: stack.clone(),
                    });
                }
            }
            '}' | ']' => {
                if stack.last() != Some(&c) {
                    break;
                }
                stack.pop();
                safe_points.push(SafePoint {
                    end: i + 1,
                    closers: stack.clone(),
                });
                if stack.is_empty() {
                    break;
                }
                expect_key = false;
            }
            '"' => {
                in_string = true;
                string_is_key = expect_key && stack.last() == Some(&'}');
            }
            ',' => expect_key = stack.last() == Some(&'}'),
            ':' => expect_key = false,
            c if c.is_whitespace() => {}
            _ => in_primitive = true,
        }
    }

    safe_points
        .iter()
        .rev()
        .take(MAX_REPAIR_ATTEMPTS)
        .find_map(|point| {
            let mut candidate = body[..point.end].trim_end().to_string();
            candidate.extend(point.closers.iter().rev());
            serde_json::from_str::<Value>(&candidate).ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_parse_is_clean() {
        let parsed = parse_llm_json(r#"{"a": 1, "b": [true]}"#, &["a", "b"]).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::Direct);
        assert_eq!(parsed.quality, ParseQuality::Clean);
        assert!(parsed.missing_fields.is_empty());
        assert!(!parsed.is_partial());
    }

    #[test]
    fn test_fenced_parse() {
        let reply = "Voici le résultat :\n```json\n{\"tariff_lines\": [], \"summary\": \"vide\"}\n```\nFin.";
        let parsed = parse_llm_json(reply, &["tariff_lines"]).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::Fenced);
        assert_eq!(parsed.value["summary"], "vide");
    }

    #[test]
    fn test_embedded_object_in_prose() {
        let reply = r#"Here is the data {"code": "8471", "note": "braces } in strings"} hope it helps"#;
        let parsed = parse_llm_json(reply, &["code"]).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::Embedded);
        assert_eq!(parsed.value["note"], "braces } in strings");
    }

    #[test]
    fn test_truncated_mid_string_drops_field() {
        let original = json!({
            "chapter": "84",
            "page": 3,
            "summary": "Machines and mechanical appliances"
        });
        let text = serde_json::to_string(&original).unwrap();
        let cut = &text[..text.find("mechanical").unwrap()];

        let parsed = parse_llm_json(cut, &["chapter", "page", "summary"]).unwrap();
        assert_eq!(parsed.quality, ParseQuality::Repaired);
        assert_eq!(parsed.value, json!({"chapter": "84", "page": 3}));
        assert_eq!(parsed.missing_fields, vec!["summary".to_string()]);
    }

    #[test]
    fn test_truncated_fields_match_original_prefix() {
        let original = json!({
            "tariff_lines": [
                {"national_code": "0101210010", "duty_rate": "2,5"},
                {"national_code": "0101290000", "duty_rate": "10"}
            ],
            "summary": "Chevaux reproducteurs"
        });
        let text = serde_json::to_string(&original).unwrap();

        for cut in (1..text.len()).filter(|i| text.is_char_boundary(*i)) {
            let Ok(parsed) = parse_llm_json(&text[..cut], &[]) else {
                continue;
            };
            let Some(map) = parsed.value.as_object() else {
                panic!("repair of an object produced a non-object");
            };
            for (key, value) in map {
                let full = &original[key];
                match (value, full) {
                    (Value::Array(part), Value::Array(whole)) => {
                        assert!(part.len() <= whole.len());
                        for (p, w) in part.iter().zip(whole) {
                            for (k, v) in p.as_object().unwrap() {
                                assert_eq!(v, &w[k], "corrupted {} at cut {}", k, cut);
                            }
                        }
                    }
                    _ => assert_eq!(value, full, "corrupted {} at cut {}", key, cut),
                }
            }
        }
    }

    #[test]
    fn test_truncated_number_is_not_kept() {
        let parsed = parse_llm_json(r#"{"a": "x", "rate": 12"#, &["a", "rate"]).unwrap();
        assert_eq!(parsed.value, json!({"a": "x"}));
    }

    #[test]
    fn test_terminated_number_is_kept() {
        let parsed = parse_llm_json(r#"{"rate": 12, "unit": "k"#, &[]).unwrap();
        assert_eq!(parsed.value, json!({"rate": 12}));
    }

    #[test]
    fn test_truncated_nested_rows_keep_complete_rows() {
        let reply = r#"```json
{"tariff_lines": [{"national_code": "0101210010"}, {"national_code": "01012"#;
        let parsed = parse_llm_json(reply, &["tariff_lines"]).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::Repair);
        let rows = parsed.value["tariff_lines"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["national_code"], "0101210010");
    }

    #[test]
    fn test_escaped_quotes_inside_strings() {
        let reply = r#"{"a": "il dit \"stop\"", "b": "tronq"#;
        let parsed = parse_llm_json(reply, &["a", "b"]).unwrap();
        assert_eq!(parsed.value["a"], "il dit \"stop\"");
        assert_eq!(parsed.missing_fields, vec!["b".to_string()]);
    }

    #[test]
    fn test_trailing_comma_is_repaired() {
        let parsed = parse_llm_json(r#"{"a": 1, "b": 2,}"#, &["a", "b"]).unwrap();
        assert_eq!(parsed.value, json!({"a": 1, "b": 2}));
        assert_eq!(parsed.quality, ParseQuality::Repaired);
    }

    #[test]
    fn test_failure_reports_fields() {
        let failure = parse_llm_json(
            "I could not read \"tariff_lines\" on this page",
            &["tariff_lines", "notes"],
        )
        .unwrap_err();
        assert_eq!(failure.recoverable_fields, vec!["tariff_lines".to_string()]);
        assert_eq!(failure.lost_fields, vec!["notes".to_string()]);
        assert!(failure.excerpt.starts_with("I could not read"));
    }

    #[test]
    fn test_failure_excerpt_is_bounded() {
        let raw = "x".repeat(EXCERPT_CHARS * 3);
        let failure = parse_llm_json(&raw, &[]).unwrap_err();
        assert_eq!(failure.excerpt.chars().count(), EXCERPT_CHARS);
    }

    #[test]
    fn test_empty_reply_fails() {
        assert!(parse_llm_json("", &["a"]).is_err());
        assert!(parse_llm_json("   ", &[]).is_err());
    }
}
