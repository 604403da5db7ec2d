//! Validation: turn one window's raw model text into checked [`Rule`]s.
//!
//! ## Why so defensive?
//!
//! Even when told to "return ONLY valid JSON", models wrap answers in
//! ```` ```json ```` fences, add a sentence of preamble, answer in the output
//! schema instead of the request schema, or invent page numbers. Everything in
//! this module is total: any input yields rules plus warnings, never a panic
//! or an error that could abort the run.
//!
//! ## Locating the JSON
//!
//! 1. Fenced code blocks, in order of appearance
//! 2. Every `{` / `[` in the text, matched to its balanced closer with a
//!    string- and escape-aware scanner, then parsed with `serde_json`
//!
//! A candidate shaped like a rule list wins over other JSON (e.g. a stray
//! `[3]` in the preamble).

use crate::document::Window;
use crate::error::{ParseError, ValidationError};
use crate::output::Rule;
use crate::pipeline::orchestrate::RawResponse;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Validated rules and warnings for one window.
#[derive(Debug, Clone, Default)]
pub struct ValidatedWindow {
    pub window_index: usize,
    pub rules: Vec<Rule>,
    pub warnings: Vec<String>,
    /// Candidates that were dropped.
    pub rejected: usize,
}

/// Validate one window's extraction outcome.
///
/// A failed extraction yields no rules and a single warning describing the
/// failure; a payload without usable JSON yields no rules and a parse
/// warning.
pub fn validate(window: &Window, response: &RawResponse) -> ValidatedWindow {
    let mut out = ValidatedWindow {
        window_index: window.index,
        ..Default::default()
    };

    let payload = match &response.payload {
        Ok(payload) => payload,
        Err(e) => {
            out.warnings.push(e.to_string());
            return out;
        }
    };

    let value = match locate_structured(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!("{}: {}", window.label, e);
            out.warnings.push(format!("{}: {}", window.label, e));
            return out;
        }
    };

    let candidates = match rule_candidates(value) {
        Ok(c) => c,
        Err(e) => {
            warn!("{}: {}", window.label, e);
            out.warnings.push(format!("{}: {}", window.label, e));
            return out;
        }
    };

    for (i, (candidate, trade_hint)) in candidates.into_iter().enumerate() {
        let position = i + 1;
        match parse_rule(position, &candidate, trade_hint.as_deref(), window) {
            Ok((rule, notes)) => {
                out.warnings
                    .extend(notes.into_iter().map(|n| format!("{}: {}", window.label, n)));
                out.rules.push(rule);
            }
            Err(e) => {
                warn!("{}: dropping {}", window.label, e);
                out.rejected += 1;
                out.warnings.push(format!("{}: {}", window.label, e));
            }
        }
    }

    debug!(
        "{}: {} rules accepted, {} rejected",
        window.label,
        out.rules.len(),
        out.rejected
    );
    out
}

// ── Locating structured data ─────────────────────────────────────────────────

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").unwrap());

/// Find the JSON value in a model response.
pub fn locate_structured(raw: &str) -> Result<Value, ParseError> {
    let text = raw.trim().trim_start_matches('\u{FEFF}');
    if text.is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let mut fallback: Option<Value> = None;

    for caps in RE_FENCED.captures_iter(text) {
        if let Ok(v) = serde_json::from_str::<Value>(caps[1].trim()) {
            if looks_like_rules(&v) {
                return Ok(v);
            }
            if v.is_object() || v.is_array() {
                fallback.get_or_insert(v);
            }
        }
    }

    let mut resume = 0;
    for (start, end) in balanced_spans(text.as_bytes()) {
        if start < resume {
            continue;
        }
        if let Ok(v) = serde_json::from_str::<Value>(&text[start..=end]) {
            if looks_like_rules(&v) {
                return Ok(v);
            }
            fallback.get_or_insert(v);
            resume = end + 1;
        }
    }

    fallback.ok_or(ParseError::NoStructuredData)
}

/// Every balanced `{…}`/`[…]` span in `bytes` as `(open, close)` indices,
/// ordered by opening position, found in a single pass.
///
/// Quotes open a string only inside a bracket, so prose around the JSON
/// cannot swallow it, and brackets inside strings are ignored. A mismatched
/// closer leaves every bracket still open unbalanced. Works on bytes: every
/// structural JSON character is ASCII and never part of a multi-byte UTF-8
/// sequence.
fn balanced_spans(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut open: Vec<(usize, u8)> = Vec::new();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push((i, b'}')),
            b'[' => open.push((i, b']')),
            b'}' | b']' => match open.pop() {
                Some((start, close)) if close == b => spans.push((start, i)),
                Some(_) => open.clear(),
                None => {}
            },
            _ => {}
        }
    }

    spans.sort_unstable();
    spans
}

fn looks_like_rules(v: &Value) -> bool {
    match v {
        Value::Object(map) => {
            map.get("rules").is_some_and(Value::is_array)
                || map.contains_key("trade")
                || is_trade_keyed(map)
        }
        Value::Array(items) => items.iter().any(Value::is_object),
        _ => false,
    }
}

/// `{ "<trade>": [ {rule}, … ], … }`: the output schema, which models
/// sometimes echo back instead of the request schema.
fn is_trade_keyed(map: &Map<String, Value>) -> bool {
    !map.is_empty()
        && map
            .values()
            .all(|v| v.as_array().is_some_and(|a| a.iter().all(Value::is_object)))
        && map.values().any(|v| v.as_array().is_some_and(|a| !a.is_empty()))
}

/// Candidate rule objects plus the trade implied by their position, if any.
fn rule_candidates(value: Value) -> Result<Vec<(Value, Option<String>)>, ParseError> {
    match value {
        Value::Array(items) => Ok(items.into_iter().map(|v| (v, None)).collect()),
        Value::Object(mut map) => {
            if let Some(rules) = map.remove("rules") {
                return match rules {
                    Value::Array(items) => Ok(items.into_iter().map(|v| (v, None)).collect()),
                    _ => Err(ParseError::UnexpectedShape),
                };
            }
            if map.contains_key("trade") {
                return Ok(vec![(Value::Object(map), None)]);
            }
            if is_trade_keyed(&map) {
                return Ok(map
                    .into_iter()
                    .flat_map(|(trade, rules)| match rules {
                        Value::Array(items) => items
                            .into_iter()
                            .map(|v| (v, Some(trade.clone())))
                            .collect::<Vec<_>>(),
                        _ => Vec::new(),
                    })
                    .collect());
            }
            Err(ParseError::UnexpectedShape)
        }
        _ => Err(ParseError::UnexpectedShape),
    }
}

// ── Per-rule checks ──────────────────────────────────────────────────────────

/// Check one candidate. Returns the rule plus non-fatal notes (ignored or
/// clipped page numbers, unusable ids).
fn parse_rule(
    position: usize,
    candidate: &Value,
    trade_hint: Option<&str>,
    window: &Window,
) -> Result<(Rule, Vec<String>), ValidationError> {
    let obj = candidate
        .as_object()
        .ok_or(ValidationError::NotAnObject { position })?;
    let mut notes = Vec::new();

    let trade = match (obj.get("trade"), trade_hint) {
        (Some(Value::String(s)), _) => s.trim().to_string(),
        (None | Some(Value::Null), Some(hint)) => hint.trim().to_string(),
        (None | Some(Value::Null), None) => {
            return Err(ValidationError::MissingField {
                position,
                field: "trade",
            })
        }
        (Some(other), _) => {
            return Err(ValidationError::InvalidField {
                position,
                field: "trade",
                detail: format!("expected a string, got {}", kind(other)),
            })
        }
    };
    if trade.is_empty() {
        return Err(ValidationError::EmptyTrade { position });
    }

    let description = match obj.get("description") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::String(_)) => {
            return Err(ValidationError::InvalidField {
                position,
                field: "description",
                detail: "empty".into(),
            })
        }
        None | Some(Value::Null) => {
            return Err(ValidationError::MissingField {
                position,
                field: "description",
            })
        }
        Some(other) => {
            return Err(ValidationError::InvalidField {
                position,
                field: "description",
                detail: format!("expected a string, got {}", kind(other)),
            })
        }
    };

    let requirements = parse_requirements(position, obj.get("requirements"))?;
    let source_pages = parse_pages(position, obj.get("source_pages"), window, &mut notes)?;

    let rule_id = match obj.get("rule_id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => {
            notes.push(format!(
                "rule #{position} has an unusable rule_id ({}); treated as absent",
                kind(other)
            ));
            None
        }
    };

    Ok((
        Rule {
            rule_id,
            trade,
            description,
            requirements,
            source_pages,
            source_window: window.label.clone(),
        },
        notes,
    ))
}

fn parse_requirements(
    position: usize,
    value: Option<&Value>,
) -> Result<Vec<String>, ValidationError> {
    let invalid = |detail: String| ValidationError::InvalidField {
        position,
        field: "requirements",
        detail,
    };

    match value {
        None | Some(Value::Null) => Err(ValidationError::MissingField {
            position,
            field: "requirements",
        }),
        // A lone string is read as a one-item list.
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    Value::Number(n) => out.push(n.to_string()),
                    Value::Bool(b) => out.push(b.to_string()),
                    Value::Null => {}
                    other => {
                        return Err(invalid(format!("items must be text, got {}", kind(other))))
                    }
                }
            }
            Ok(out)
        }
        Some(other) => Err(invalid(format!("expected a list, got {}", kind(other)))),
    }
}

/// Parse `source_pages` and clip it to the window's page range.
fn parse_pages(
    position: usize,
    value: Option<&Value>,
    window: &Window,
    notes: &mut Vec<String>,
) -> Result<BTreeSet<usize>, ValidationError> {
    let items: Vec<&Value> = match value {
        None | Some(Value::Null) => {
            return Err(ValidationError::MissingField {
                position,
                field: "source_pages",
            })
        }
        Some(Value::Array(items)) => items.iter().collect(),
        Some(v @ (Value::Number(_) | Value::String(_))) => vec![v],
        Some(other) => {
            return Err(ValidationError::InvalidField {
                position,
                field: "source_pages",
                detail: format!("expected a list of page numbers, got {}", kind(other)),
            })
        }
    };

    let mut pages = BTreeSet::new();
    let mut unreadable = Vec::new();
    let mut outside = BTreeSet::new();

    for item in items {
        match page_number(item) {
            Some(p) if window.contains_page(p) => {
                pages.insert(p);
            }
            Some(p) => {
                outside.insert(p);
            }
            None => unreadable.push(item.to_string()),
        }
    }

    if !unreadable.is_empty() {
        notes.push(format!(
            "rule #{position} has unreadable source_pages entries {}; ignored",
            unreadable.join(", ")
        ));
    }
    if !outside.is_empty() {
        notes.push(format!(
            "rule #{position} cites pages {:?} outside window pages {}-{}; clipped",
            outside, window.start_page, window.end_page
        ));
    }
    Ok(pages)
}

fn page_number(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|p| usize::try_from(p).ok()),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Page};
    use crate::error::WindowError;

    /// Window 2 of a 12-page document: pages 5–9.
    fn window() -> Window {
        let doc = Document::new("spec", (1..=12).map(|i| Page::Text(format!("p{i}"))).collect());
        doc.windows(5, 1).unwrap().swap_remove(1)
    }

    fn ok(payload: &str) -> RawResponse {
        RawResponse {
            window_index: 2,
            payload: Ok(payload.to_string()),
            attempts: 1,
        }
    }

    const GOOD: &str = r#"{"rules": [
        {"trade": "Plumber", "rule_id": "P-001", "description": "Pressure test",
         "requirements": ["150 psi", "2 hours"], "source_pages": [5, 6]}
    ]}"#;

    #[test]
    fn clean_json_is_accepted() {
        let v = validate(&window(), &ok(GOOD));
        assert_eq!(v.rules.len(), 1);
        assert!(v.warnings.is_empty(), "{:?}", v.warnings);
        let r = &v.rules[0];
        assert_eq!(r.trade, "Plumber");
        assert_eq!(r.rule_id.as_deref(), Some("P-001"));
        assert_eq!(r.requirements, vec!["150 psi", "2 hours"]);
        assert_eq!(r.source_pages, BTreeSet::from([5, 6]));
        assert_eq!(r.source_window, "spec_chunk_2");
    }

    #[test]
    fn json_embedded_in_prose_is_found() {
        let payload = format!("Sure! Here are the rules I found on pages [5-9]:\n{GOOD}\nLet me know.");
        let v = validate(&window(), &ok(&payload));
        assert_eq!(v.rules.len(), 1, "{:?}", v.warnings);
    }

    #[test]
    fn fenced_json_is_found() {
        let payload = format!("```json\n{GOOD}\n```");
        assert_eq!(validate(&window(), &ok(&payload)).rules.len(), 1);
    }

    #[test]
    fn brackets_inside_strings_do_not_confuse_the_scanner() {
        let payload = r#"Result: {"rules": [{"trade": "steel", "description": "Use {A325} bolts ] \" [",
            "requirements": ["torque [per table]"], "source_pages": [7]}]} done"#;
        let v = validate(&window(), &ok(payload));
        assert_eq!(v.rules.len(), 1, "{:?}", v.warnings);
        assert_eq!(v.rules[0].description, "Use {A325} bolts ] \" [");
    }

    #[test]
    fn bare_array_and_single_object_are_accepted() {
        let arr = r#"[{"trade": "roofer", "description": "d", "requirements": [], "source_pages": [9]}]"#;
        assert_eq!(validate(&window(), &ok(arr)).rules.len(), 1);

        let single = r#"{"trade": "roofer", "description": "d", "requirements": ["x"], "source_pages": [9]}"#;
        assert_eq!(validate(&window(), &ok(single)).rules.len(), 1);
    }

    #[test]
    fn trade_keyed_output_schema_is_accepted() {
        let payload = r#"{"tiler": [{"rule_id": "T-1", "description": "Grout joints 3mm",
            "requirements": ["3mm"], "source_pages": [8]}]}"#;
        let v = validate(&window(), &ok(payload));
        assert_eq!(v.rules.len(), 1, "{:?}", v.warnings);
        assert_eq!(v.rules[0].trade, "tiler");
    }

    #[test]
    fn stray_json_before_rules_is_skipped() {
        let payload = format!("See [3] and {{\"note\": 1}} first. {GOOD}");
        assert_eq!(validate(&window(), &ok(&payload)).rules.len(), 1);
    }

    #[test]
    fn missing_fields_drop_only_that_rule() {
        let payload = r#"{"rules": [
            {"trade": "painter", "description": "Two coats", "requirements": ["2"], "source_pages": [5]},
            {"trade": "painter", "requirements": ["x"], "source_pages": [5]},
            {"description": "No trade", "requirements": [], "source_pages": [5]},
            {"trade": "  ", "description": "Blank trade", "requirements": [], "source_pages": [5]},
            {"trade": "painter", "description": "No pages", "requirements": []},
            {"trade": "painter", "description": "No reqs", "source_pages": [5]},
            "not an object"
        ]}"#;
        let v = validate(&window(), &ok(payload));
        assert_eq!(v.rules.len(), 1);
        assert_eq!(v.rejected, 6);
        assert_eq!(v.warnings.len(), 6);
        assert!(v.warnings[0].contains("rule #2 is missing required field 'description'"));
        assert!(v.warnings[1].contains("'trade'"));
        assert!(v.warnings[2].contains("empty trade"));
        assert!(v.warnings[3].contains("'source_pages'"));
        assert!(v.warnings[4].contains("'requirements'"));
        assert!(v.warnings[5].contains("not a JSON object"));
        assert!(v.warnings.iter().all(|w| w.starts_with("spec_chunk_2: ")));
    }

    #[test]
    fn out_of_window_pages_are_clipped_with_warning() {
        let payload = r#"[{"trade": "hvac", "description": "Duct sealing",
            "requirements": ["class A"], "source_pages": [3, 5, "6", 9, 10, 42]}]"#;
        let v = validate(&window(), &ok(payload));
        assert_eq!(v.rules[0].source_pages, BTreeSet::from([5, 6, 9]));
        assert_eq!(v.warnings.len(), 1);
        assert!(v.warnings[0].contains("{3, 10, 42}"), "{}", v.warnings[0]);
        assert!(v.warnings[0].contains("clipped"));
    }

    #[test]
    fn unreadable_pages_are_ignored_with_warning() {
        let payload = r#"[{"trade": "hvac", "description": "d", "requirements": [],
            "source_pages": ["00 72 13 - 1", 7, null]}]"#;
        let v = validate(&window(), &ok(payload));
        assert_eq!(v.rules[0].source_pages, BTreeSet::from([7]));
        assert!(v.warnings[0].contains("unreadable"));
    }

    #[test]
    fn rule_id_handling() {
        let payload = r#"[
            {"trade": "steel", "rule_id": " S-1 ", "description": "a", "requirements": [], "source_pages": [5]},
            {"trade": "steel", "rule_id": "", "description": "b", "requirements": [], "source_pages": [5]},
            {"trade": "steel", "rule_id": 17, "description": "c", "requirements": [], "source_pages": [5]},
            {"trade": "steel", "description": "d", "requirements": [], "source_pages": [5]}
        ]"#;
        let v = validate(&window(), &ok(payload));
        let ids: Vec<Option<&str>> = v.rules.iter().map(|r| r.rule_id.as_deref()).collect();
        assert_eq!(ids, vec![Some(" S-1 "), None, Some("17"), None]);
    }

    #[test]
    fn scalar_requirements_are_coerced() {
        let payload = r#"[{"trade": "drywall", "description": "d",
            "requirements": ["5/8 in", 16, true, null], "source_pages": [5]}]"#;
        let v = validate(&window(), &ok(payload));
        assert_eq!(v.rules[0].requirements, vec!["5/8 in", "16", "true"]);

        let lone = r#"[{"trade": "drywall", "description": "d", "requirements": "one", "source_pages": 5}]"#;
        let v = validate(&window(), &ok(lone));
        assert_eq!(v.rules[0].requirements, vec!["one"]);
        assert_eq!(v.rules[0].source_pages, BTreeSet::from([5]));
    }

    #[test]
    fn no_json_yields_parse_warning() {
        for payload in ["", "   ", "I could not find any rules.", "{ truncated: [", "[1, 2"] {
            let v = validate(&window(), &ok(payload));
            assert!(v.rules.is_empty(), "{payload:?}");
            assert_eq!(v.warnings.len(), 1, "{payload:?}");
        }
    }

    #[test]
    fn wrong_shape_yields_parse_warning() {
        let v = validate(&window(), &ok(r#"{"rules": "none"}"#));
        assert!(v.rules.is_empty());
        assert!(v.warnings[0].contains("no rule list"));

        let v = validate(&window(), &ok("[1, 2, 3]"));
        assert!(v.rules.is_empty());
        assert_eq!(v.rejected, 3);
    }

    #[test]
    fn failed_window_becomes_single_warning() {
        let response = RawResponse {
            window_index: 2,
            payload: Err(WindowError::Permanent {
                window: 2,
                detail: "401".into(),
            }),
            attempts: 1,
        };
        let v = validate(&window(), &response);
        assert!(v.rules.is_empty());
        assert_eq!(v.warnings, vec!["window 2: extraction failed permanently: 401"]);
    }

    #[test]
    fn arbitrary_garbage_never_panics() {
        let samples = [
            "}{][", "\"\"\"", "{\"a\": \"\\", "[[[[[[", "]]]]", "{\"rules\": [null, 1, \"x\", []]}",
            "```\n```", "```json\nnot json\n```", "ünïcödé {\"trade\": \"é\"} ✓", "\u{FEFF}[]",
        ];
        for s in samples {
            let _ = validate(&window(), &ok(s));
        }
    }

    #[test]
    fn truncated_answer_still_yields_its_complete_rules() {
        let payload = r#"{"rules": [{"trade": "plumber", "description": "Vent stacks",
            "requirements": [], "source_pages": [6]}, {"trade": "roofer", "descr"#;
        let v = validate(&window(), &ok(payload));
        assert_eq!(v.rules.len(), 1, "{:?}", v.warnings);
        assert_eq!(v.rules[0].trade, "plumber");
    }

    #[test]
    fn unclosed_brackets_are_scanned_in_linear_time() {
        let start = std::time::Instant::now();
        assert_eq!(
            locate_structured(&"[".repeat(60_000)),
            Err(ParseError::NoStructuredData)
        );
        assert_eq!(
            locate_structured(&"{\"a\": [".repeat(20_000)),
            Err(ParseError::NoStructuredData)
        );
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn balanced_spans_pair_nested_brackets() {
        assert_eq!(balanced_spans(b"x [1, {\"a\": 2}] y"), vec![(2, 14), (6, 13)]);
        assert_eq!(balanced_spans(b"[ { ] [0]"), vec![(6, 8)]);
        assert_eq!(balanced_spans(b"say \"x\" then [1]"), vec![(13, 15)]);
    }

    #[test]
    fn locate_reports_reason() {
        assert_eq!(locate_structured("  "), Err(ParseError::EmptyResponse));
        assert_eq!(locate_structured("nothing"), Err(ParseError::NoStructuredData));
        assert!(locate_structured("x [1] y").is_ok());
    }
}
