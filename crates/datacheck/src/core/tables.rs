//! Catalog bookkeeping between the two sides of a database pair.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Which tables exist where, and which get checked.
///
/// Computed once per database pair before any checker is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSet {
    /// Tables in the source catalog.
    pub source: Vec<String>,
    /// Tables in the target catalog.
    pub target: Vec<String>,
    /// Tables that will be checked, in source catalog order.
    pub to_check: Vec<String>,
    /// Tables only in the source (missing on the target).
    pub source_more: Vec<String>,
    /// Tables only in the target (missing on the source).
    pub target_more: Vec<String>,
    /// Tables excluded by the operator.
    pub skip: Vec<String>,
}

impl TableSet {
    /// Diff the two catalogs. `to_check` is the intersection minus `skip`.
    pub fn resolve(source: Vec<String>, target: Vec<String>, skip: Vec<String>) -> Self {
        let target_names: HashSet<&str> = target.iter().map(String::as_str).collect();
        let source_names: HashSet<&str> = source.iter().map(String::as_str).collect();
        let skipped: HashSet<&str> = skip.iter().map(String::as_str).collect();

        let (common, source_more): (Vec<String>, Vec<String>) = source
            .iter()
            .cloned()
            .partition(|t| target_names.contains(t.as_str()));
        let target_more = target
            .iter()
            .filter(|t| !source_names.contains(t.as_str()))
            .cloned()
            .collect();
        let to_check = common
            .into_iter()
            .filter(|t| !skipped.contains(t.as_str()))
            .collect();

        Self {
            source,
            target,
            to_check,
            source_more,
            target_more,
            skip,
        }
    }

    /// Use an operator-supplied table list without reading either catalog.
    pub fn explicit(requested: Vec<String>, skip: Vec<String>) -> Self {
        let to_check = requested
            .into_iter()
            .filter(|t| !skip.contains(t))
            .collect();
        Self {
            to_check,
            skip,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_splits_catalogs() {
        let set = TableSet::resolve(
            names(&["a", "b", "c", "d"]),
            names(&["b", "c", "d", "e"]),
            names(&["d"]),
        );
        assert_eq!(set.to_check, names(&["b", "c"]));
        assert_eq!(set.source_more, names(&["a"]));
        assert_eq!(set.target_more, names(&["e"]));
        assert_eq!(set.source.len(), 4);
        assert_eq!(set.target.len(), 4);
    }

    #[test]
    fn test_resolve_empty_catalogs() {
        let set = TableSet::resolve(vec![], vec![], vec![]);
        assert!(set.to_check.is_empty());
        assert!(set.source_more.is_empty());
        assert!(set.target_more.is_empty());
    }

    #[test]
    fn test_explicit_list_honors_skip() {
        let set = TableSet::explicit(names(&["x", "y"]), names(&["y"]));
        assert_eq!(set.to_check, names(&["x"]));
        assert!(set.source.is_empty());
    }
}
