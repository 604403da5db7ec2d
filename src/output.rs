//! Result types: validated rules, trade groups and the per-run summary.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;

/// A validated requirement extracted from one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Model-provided identifier, kept verbatim. `None` when absent or blank.
    pub rule_id: Option<String>,
    /// Trade as written by the model (trimmed).
    pub trade: String,
    pub description: String,
    pub requirements: Vec<String>,
    /// Absolute page numbers, always within the source window's range.
    pub source_pages: BTreeSet<usize>,
    /// Label of the window the rule was first seen in.
    pub source_window: String,
}

/// Normalise a trade name into its grouping key: trimmed, lower-cased,
/// internal whitespace collapsed to single spaces.
pub fn normalize_trade(trade: &str) -> String {
    trade
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rules for one trade, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeGroup {
    /// Normalised trade name.
    pub trade: String,
    pub rules: Vec<Rule>,
}

/// All trade groups of a run, in first-seen order.
///
/// Serialises as a JSON object `{ "<trade>": [rule, …] }` whose keys keep
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeGroups {
    groups: Vec<TradeGroup>,
}

impl TradeGroups {
    pub(crate) fn from_groups(groups: Vec<TradeGroup>) -> Self {
        Self { groups }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TradeGroup> {
        self.groups.iter()
    }

    /// Trade names in first-seen order.
    pub fn trades(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.trade.as_str())
    }

    /// Rules for `trade`, matched after normalisation.
    pub fn get(&self, trade: &str) -> Option<&[Rule]> {
        let key = normalize_trade(trade);
        self.groups
            .iter()
            .find(|g| g.trade == key)
            .map(|g| g.rules.as_slice())
    }

    /// Every rule across all trades, group by group.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.groups.iter().flat_map(|g| g.rules.iter())
    }

    pub fn trade_count(&self) -> usize {
        self.groups.len()
    }

    pub fn rule_count(&self) -> usize {
        self.groups.iter().map(|g| g.rules.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Serialize for TradeGroups {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.groups.len()))?;
        for group in &self.groups {
            map.serialize_entry(&group.trade, &group.rules)?;
        }
        map.end()
    }
}

/// Counters and timings for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_pages: usize,
    pub window_count: usize,
    pub failed_windows: usize,
    /// Rule candidates that passed validation, before deduplication.
    pub validated_rules: usize,
    /// Candidates dropped by the validator.
    pub rejected_rules: usize,
    /// Validated rules merged into an earlier entry.
    pub duplicates_merged: usize,
    /// Rules in the final trade groups.
    pub rule_count: usize,
    pub extraction_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Outcome of a run that was not aborted.
///
/// A run with `failed_windows` non-empty is a partial success: rules from the
/// remaining windows are present and every failure is listed in `warnings`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub document_id: String,
    pub groups: TradeGroups,
    /// 1-based indices of windows whose extraction failed.
    pub failed_windows: BTreeSet<usize>,
    /// Failures, parse problems and dropped rules, in window order.
    pub warnings: Vec<String>,
    pub stats: RunStats,
}

impl PipelineResult {
    /// `true` when every window was extracted.
    pub fn is_complete(&self) -> bool {
        self.failed_windows.is_empty()
    }
}
