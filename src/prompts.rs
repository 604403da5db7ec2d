//! Prompts for window-level rule extraction.
//!
//! Every prompt lives here so prompt changes never touch retry or parsing
//! code, and unit tests can inspect the text without a model.
//!
//! Callers can replace the system prompt via
//! [`crate::config::PipelineConfig::system_prompt`]; the per-window user
//! message from [`window_instructions`] is always sent because it carries the
//! page numbers the validator checks against.

/// Trades extracted when the caller does not configure a list.
pub const DEFAULT_TRADES: &[&str] = &[
    "carpenter",
    "drywall",
    "electrician",
    "hvac",
    "insulator",
    "painter",
    "plumber",
    "roofer",
    "steel",
    "tiler",
];

/// Default system prompt for turning spec-book pages into rule records.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a senior construction manager reading pages of a construction spec book.
Extract explicit, actionable rules for the trades you are given: quality requirements,
dimensions, tolerances, materials and every "shall" statement.

Return ONLY valid JSON with this schema:
{
  "rules": [
    {
      "trade": "plumber",
      "rule_id": "P-001",
      "description": "Short, precise requirement",
      "requirements": ["bullet-like requirement 1", "requirement 2"],
      "source_pages": [1, 2]
    }
  ]
}

Rules must be specific (not generic) and derived directly from the pages shown.
If no rules apply to a trade, omit that trade entirely.
If the same rule appears on several pages, list it once with all of its pages.
Do not include any text outside the JSON."#;

/// Per-window instructions: allowed trades and the absolute page numbers of
/// the pages that follow.
pub fn window_instructions(trades: &[String], start_page: usize, end_page: usize) -> String {
    let trade_list = trades
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    let pages = if start_page == end_page {
        format!("page {start_page}")
    } else {
        format!("pages {start_page} to {end_page}")
    };
    format!(
        "Allowed trades: {trade_list}\n\
         The following content is {pages} of the document, in order. \
         Report source_pages using these page numbers ({start_page}–{end_page})."
    )
}

/// Header placed before each text page in the user message.
pub fn page_header(page: usize) -> String {
    format!("--- Page {page} ---")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_list_trades_and_pages() {
        let trades = vec!["plumber".to_string(), " ".to_string(), "roofer".to_string()];
        let text = window_instructions(&trades, 5, 9);
        assert!(text.contains("Allowed trades: plumber, roofer"), "got: {text}");
        assert!(text.contains("pages 5 to 9"), "got: {text}");
    }

    #[test]
    fn single_page_window_is_worded_singular() {
        let text = window_instructions(&["steel".to_string()], 12, 12);
        assert!(text.contains("page 12 of the document"), "got: {text}");
    }

    #[test]
    fn system_prompt_requests_rules_object() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("\"rules\""));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("source_pages"));
    }
}
