//! Aggregation: merge every window's rules into trade groups.
//!
//! Windows overlap, so the same rule is routinely reported twice. Within a
//! trade group two rules are the same when
//!
//! * both carry a `rule_id` and the ids are equal (surrounding whitespace
//!   ignored), or
//! * the incoming rule has no `rule_id` and an existing rule has the same
//!   description and requirements.
//!
//! The first occurrence (lowest window index, then position in the window)
//! is kept; later duplicates only contribute their `source_pages`.

use crate::output::{normalize_trade, Rule, TradeGroup, TradeGroups};
use std::collections::HashMap;
use tracing::debug;

/// Aggregated groups plus how many rules were folded into earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregated {
    pub groups: TradeGroups,
    pub duplicates_merged: usize,
}

#[derive(Default)]
struct GroupIndex {
    by_id: HashMap<String, usize>,
    by_content: HashMap<(String, Vec<String>), usize>,
}

/// Group and deduplicate rules. Input order does not matter beyond window
/// index: batches are stably sorted by index first.
pub fn aggregate(mut batches: Vec<(usize, Vec<Rule>)>) -> Aggregated {
    batches.sort_by_key(|(index, _)| *index);

    let mut groups: Vec<TradeGroup> = Vec::new();
    let mut indexes: Vec<GroupIndex> = Vec::new();
    let mut slot_of: HashMap<String, usize> = HashMap::new();
    let mut merged = 0usize;

    for rule in batches.into_iter().flat_map(|(_, rules)| rules) {
        let key = normalize_trade(&rule.trade);
        let slot = *slot_of.entry(key.clone()).or_insert_with(|| {
            groups.push(TradeGroup {
                trade: key,
                rules: Vec::new(),
            });
            indexes.push(GroupIndex::default());
            groups.len() - 1
        });

        let group = &mut groups[slot];
        let index = &mut indexes[slot];

        let existing = match rule.rule_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => index.by_id.get(id).copied(),
            _ => index
                .by_content
                .get(&(rule.description.clone(), rule.requirements.clone()))
                .copied(),
        };

        match existing {
            Some(pos) => {
                let kept = &mut group.rules[pos];
                debug!(
                    "Merging duplicate {} rule from {} into {}",
                    group.trade, rule.source_window, kept.source_window
                );
                kept.source_pages.extend(rule.source_pages);
                merged += 1;
            }
            None => {
                let pos = group.rules.len();
                if let Some(id) = rule.rule_id.as_deref().map(str::trim) {
                    if !id.is_empty() {
                        index.by_id.insert(id.to_string(), pos);
                    }
                }
                index
                    .by_content
                    .entry((rule.description.clone(), rule.requirements.clone()))
                    .or_insert(pos);
                group.rules.push(rule);
            }
        }
    }

    Aggregated {
        groups: TradeGroups::from_groups(groups),
        duplicates_merged: merged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn rule(trade: &str, id: Option<&str>, desc: &str, pages: &[usize], window: usize) -> Rule {
        Rule {
            rule_id: id.map(str::to_string),
            trade: trade.into(),
            description: desc.into(),
            requirements: vec![format!("req for {desc}")],
            source_pages: pages.iter().copied().collect(),
            source_window: format!("spec_chunk_{window}"),
        }
    }

    #[test]
    fn overlap_duplicate_is_merged_with_pages_unioned() {
        let out = aggregate(vec![
            (1, vec![rule("plumber", Some("P-001"), "Pressure test", &[4, 5], 1)]),
            (2, vec![rule("Plumber", Some("P-001"), "Pressure test (cont.)", &[5, 6], 2)]),
        ]);
        let plumbers = out.groups.get("plumber").unwrap();
        assert_eq!(plumbers.len(), 1);
        assert_eq!(plumbers[0].description, "Pressure test");
        assert_eq!(plumbers[0].source_window, "spec_chunk_1");
        assert_eq!(plumbers[0].source_pages, BTreeSet::from([4, 5, 6]));
        assert_eq!(out.duplicates_merged, 1);
    }

    #[test]
    fn trades_group_case_and_whitespace_insensitively() {
        let out = aggregate(vec![(
            1,
            vec![
                rule("HVAC", Some("H-1"), "a", &[1], 1),
                rule(" hvac ", Some("H-2"), "b", &[2], 1),
                rule("Sheet  Metal", None, "c", &[3], 1),
            ],
        )]);
        assert_eq!(out.groups.trades().collect::<Vec<_>>(), vec!["hvac", "sheet metal"]);
        assert_eq!(out.groups.get("hvac").unwrap().len(), 2);
    }

    #[test]
    fn rules_without_id_dedup_on_content() {
        let out = aggregate(vec![
            (1, vec![rule("painter", None, "Two coats", &[2], 1)]),
            (2, vec![rule("painter", None, "Two coats", &[5], 2)]),
            (2, vec![rule("painter", None, "Three coats", &[5], 2)]),
        ]);
        let painters = out.groups.get("painter").unwrap();
        assert_eq!(painters.len(), 2);
        assert_eq!(painters[0].source_pages, BTreeSet::from([2, 5]));
    }

    #[test]
    fn distinct_ids_are_not_merged_even_with_same_content() {
        let out = aggregate(vec![(
            1,
            vec![
                rule("steel", Some("S-1"), "Bolt torque", &[1], 1),
                rule("steel", Some("S-2"), "Bolt torque", &[1], 1),
            ],
        )]);
        assert_eq!(out.groups.get("steel").unwrap().len(), 2);
        assert_eq!(out.duplicates_merged, 0);
    }

    #[test]
    fn same_id_in_different_trades_is_not_merged() {
        let out = aggregate(vec![(
            1,
            vec![
                rule("roofer", Some("X-1"), "a", &[1], 1),
                rule("tiler", Some("X-1"), "a", &[1], 1),
            ],
        )]);
        assert_eq!(out.groups.rule_count(), 2);
    }

    #[test]
    fn rule_with_id_is_not_merged_into_earlier_idless_copy() {
        let out = aggregate(vec![
            (1, vec![rule("plumber", None, "Pressure test", &[4], 1)]),
            (2, vec![rule("plumber", Some("P-001"), "Pressure test", &[5], 2)]),
        ]);
        let plumbers = out.groups.get("plumber").unwrap();
        assert_eq!(plumbers.len(), 2);
        assert_eq!(plumbers[0].rule_id, None);
        assert_eq!(plumbers[0].source_pages, BTreeSet::from([4]));
        assert_eq!(plumbers[1].rule_id.as_deref(), Some("P-001"));
        assert_eq!(out.duplicates_merged, 0);
    }

    #[test]
    fn idless_copy_merges_into_earlier_rule_with_id() {
        let out = aggregate(vec![
            (1, vec![rule("plumber", Some("P-001"), "Pressure test", &[4], 1)]),
            (2, vec![rule("plumber", None, "Pressure test", &[5], 2)]),
        ]);
        let plumbers = out.groups.get("plumber").unwrap();
        assert_eq!(plumbers.len(), 1);
        assert_eq!(plumbers[0].rule_id.as_deref(), Some("P-001"));
        assert_eq!(plumbers[0].source_pages, BTreeSet::from([4, 5]));
        assert_eq!(plumbers[0].source_window, "spec_chunk_1");
        assert_eq!(out.duplicates_merged, 1);
    }

    #[test]
    fn first_seen_is_by_window_index_not_arrival() {
        let out = aggregate(vec![
            (3, vec![rule("roofer", Some("R-1"), "late", &[9], 3)]),
            (1, vec![rule("electrician", None, "e", &[1], 1)]),
            (2, vec![rule("roofer", Some("R-1"), "early", &[5], 2)]),
        ]);
        assert_eq!(out.groups.trades().collect::<Vec<_>>(), vec!["electrician", "roofer"]);
        let roofers = out.groups.get("roofer").unwrap();
        assert_eq!(roofers[0].description, "early");
        assert_eq!(roofers[0].source_pages, BTreeSet::from([5, 9]));
    }

    #[test]
    fn reaggregation_is_idempotent() {
        let first = aggregate(vec![
            (1, vec![
                rule("plumber", Some("P-001"), "Pressure test", &[4, 5], 1),
                rule("plumber", None, "Slope", &[3], 1),
                rule("Roofer", None, "Flashing", &[2], 1),
            ]),
            (2, vec![
                rule("plumber", Some("P-001"), "Pressure test", &[5, 6], 2),
                rule("plumber", None, "Slope", &[5], 2),
            ]),
        ]);
        let again = aggregate(vec![(1, first.groups.rules().cloned().collect())]);
        assert_eq!(again.groups, first.groups);
        assert_eq!(again.duplicates_merged, 0);
    }

    #[test]
    fn empty_input_gives_empty_groups() {
        let out = aggregate(Vec::new());
        assert!(out.groups.is_empty());
    }
}
