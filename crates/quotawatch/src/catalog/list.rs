//! Normalisation and set-style diffing of list-typed section fields.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The one value every "empty field" placeholder collapses to.
pub const EMPTY_SENTINEL: &str = "";

/// Placeholder characters the catalog uses for blank cells that
/// `char::is_whitespace` does not cover.
const PLACEHOLDERS: [char; 2] = ['\u{200b}', '\u{feff}'];

/// Trims whitespace and placeholder characters from a list item.
///
/// A blank or placeholder-only item becomes [`EMPTY_SENTINEL`].
pub fn normalize_item(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || PLACEHOLDERS.contains(&c))
        .to_string()
}

/// Normalises items and drops repeats, keeping first-seen order.
pub fn dedup_items(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|item| normalize_item(item))
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Expands a remarks cell into list items.
///
/// No remarks gives an empty list, blank remarks give the single sentinel
/// item, anything else gives its non-blank lines.
pub fn remarks_items(remarks: Option<&str>) -> Vec<String> {
    let Some(text) = remarks else {
        return Vec::new();
    };

    let lines: Vec<String> = text
        .lines()
        .map(normalize_item)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        vec![EMPTY_SENTINEL.to_string()]
    } else {
        lines
    }
}

/// Items added to and removed from a list field between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ListDelta {
    /// Computes the delta between two lists treated as ordered sets.
    pub fn between(old: &[String], new: &[String]) -> Self {
        let old = dedup_items(old);
        let new = dedup_items(new);

        let old_set: HashSet<&str> = old.iter().map(String::as_str).collect();
        let new_set: HashSet<&str> = new.iter().map(String::as_str).collect();

        let added = new
            .iter()
            .filter(|item| !old_set.contains(item.as_str()))
            .cloned()
            .collect();
        let removed = old
            .iter()
            .filter(|item| !new_set.contains(item.as_str()))
            .cloned()
            .collect();

        Self { added, removed }
    }

    /// Returns true if nothing was added or removed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_placeholders() {
        assert_eq!(normalize_item("  WONG, Ken \n"), "WONG, Ken");
        assert_eq!(normalize_item("\u{a0}"), EMPTY_SENTINEL);
        assert_eq!(normalize_item("\u{200b}\u{3000}"), EMPTY_SENTINEL);
        assert_eq!(normalize_item("\u{feff}TBA"), "TBA");
    }

    #[test]
    fn test_dedup_keeps_first_seen_order() {
        let items = strings(&["Room 2465", "LTA", "Room 2465 ", "LTB", "LTA"]);
        assert_eq!(dedup_items(&items), strings(&["Room 2465", "LTA", "LTB"]));
    }

    #[test]
    fn test_delta_sets_are_disjoint() {
        let old = strings(&["Mo 09:00AM", "We 09:00AM", "We 09:00AM", "Fr 10:00AM"]);
        let new = strings(&["Fr 10:00AM", "Tu 09:00AM", "Tu 09:00AM", "Mo 09:00AM"]);
        let delta = ListDelta::between(&old, &new);

        assert_eq!(delta.added, strings(&["Tu 09:00AM"]));
        assert_eq!(delta.removed, strings(&["We 09:00AM"]));
        for item in &delta.added {
            assert!(!delta.removed.contains(item));
            assert!(new.contains(item) && !old.contains(item));
        }
    }

    #[test]
    fn test_reordering_is_not_a_change() {
        let old = strings(&["A", "B", "C"]);
        let new = strings(&["C", "A", "B", "B"]);
        assert!(ListDelta::between(&old, &new).is_empty());
    }

    #[test]
    fn test_remarks_items() {
        assert!(remarks_items(None).is_empty());
        assert_eq!(remarks_items(Some("\u{a0}")), strings(&[EMPTY_SENTINEL]));
        assert_eq!(remarks_items(Some("")), strings(&[EMPTY_SENTINEL]));
        assert_eq!(
            remarks_items(Some("> Online\n\n> Flipped")),
            strings(&["> Online", "> Flipped"])
        );
    }

    #[test]
    fn test_remarks_absent_vs_empty_differs() {
        let delta = ListDelta::between(&remarks_items(None), &remarks_items(Some(" ")));
        assert_eq!(delta.added, strings(&[EMPTY_SENTINEL]));
        assert!(delta.removed.is_empty());
    }
}
