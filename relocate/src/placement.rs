//! Node-placement constraint merging.
//!
//! A migration may carry a one-off placement addition. The addition can only
//! narrow the set of eligible target nodes: keys the workload already
//! constrains keep the workload's value, and conflicting addition entries are
//! dropped. The merged map is applied to the target context of one attempt
//! and never written back to the workload.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::workload::{Node, PlacementMap};

/// Merge a workload's persistent placement with a migration's addition.
///
/// Every key of `base` is kept unchanged. Keys only present in `addition`
/// are added. Keys present in both keep the `base` value.
pub fn merge(base: &PlacementMap, addition: &PlacementMap) -> PlacementMap {
    let mut merged = base.clone();
    for (key, value) in addition {
        merged
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    merged
}

/// Keys of `addition` that `merge` discards because `base` already owns them.
pub fn dropped_keys(base: &PlacementMap, addition: &PlacementMap) -> Vec<String> {
    addition
        .keys()
        .filter(|key| base.contains_key(*key))
        .cloned()
        .collect()
}

/// Placement applied to the ephemeral target context of one migration attempt.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TargetPlacement {
    selector: PlacementMap,
    dropped: Vec<String>,
}

impl TargetPlacement {
    /// Resolve the target placement from one snapshot of the workload's map.
    pub fn resolve(base: &PlacementMap, addition: &PlacementMap) -> Self {
        let dropped = dropped_keys(base, addition);
        if !dropped.is_empty() {
            tracing::debug!(
                dropped = ?dropped,
                "placement addition overlaps workload constraints; keeping workload values"
            );
        }
        Self {
            selector: merge(base, addition),
            dropped,
        }
    }

    /// The merged key/value pairs a target node must carry.
    pub fn selector(&self) -> &PlacementMap {
        &self.selector
    }

    /// Addition keys that were discarded in favour of the workload's value.
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    /// Consume into the merged map handed to the scheduler.
    pub fn into_selector(self) -> PlacementMap {
        self.selector
    }

    /// Whether `node` carries every pair of the merged placement.
    pub fn is_satisfied_by(&self, node: &Node) -> bool {
        node.satisfies(&self.selector)
    }
}

/// Parse `key=value` entries into an addition map.
///
/// The whole input is rejected on the first malformed entry, before any map
/// is returned. A later entry for the same key replaces an earlier one.
pub fn parse_added_placement<I, S>(entries: I) -> Result<PlacementMap, ValidationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = PlacementMap::new();
    for entry in entries {
        let entry = entry.as_ref();
        let mut parts = entry.split('=');
        let (key, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None) => (key, value),
            _ => {
                return Err(ValidationError::MalformedEntry {
                    entry: entry.to_string(),
                });
            }
        };
        if key.trim().is_empty() {
            return Err(ValidationError::EmptyKey {
                entry: entry.to_string(),
            });
        }
        if value.trim().is_empty() {
            return Err(ValidationError::EmptyValue {
                entry: entry.to_string(),
            });
        }
        parsed.insert(key.to_string(), value.to_string());
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn map(pairs: &[(&str, &str)]) -> PlacementMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_keeps_base_value_on_conflict() {
        let base = map(&[("zone", "vmi")]);
        let addition = map(&[("zone", "migration"), ("team", "migration")]);

        let merged = merge(&base, &addition);
        assert_eq!(merged, map(&[("zone", "vmi"), ("team", "migration")]));
        assert_eq!(dropped_keys(&base, &addition), vec!["zone".to_string()]);
    }

    #[test]
    fn test_merge_with_empty_inputs() {
        let base = map(&[("zone", "vmi")]);
        assert_eq!(merge(&base, &PlacementMap::new()), base);
        assert_eq!(merge(&PlacementMap::new(), &base), base);
        assert!(merge(&PlacementMap::new(), &PlacementMap::new()).is_empty());
    }

    #[test]
    fn test_merge_accepts_unsatisfiable_addition() {
        let base = PlacementMap::new();
        let addition = map(&[("kubevirt.io/target", "brokenTarget")]);
        let target = TargetPlacement::resolve(&base, &addition);
        assert_eq!(target.selector(), &addition);
        assert!(!target.is_satisfied_by(&Node::new("node-a")));
    }

    #[test]
    fn test_target_placement_reports_dropped_keys() {
        let base = map(&[("zone", "vmi")]);
        let addition = map(&[("zone", "migration"), ("team", "migration")]);
        let target = TargetPlacement::resolve(&base, &addition);

        assert_eq!(target.dropped(), ["zone".to_string()]);
        let node = Node::new("node-b")
            .with_label("zone", "vmi")
            .with_label("team", "migration");
        assert!(target.is_satisfied_by(&node));
    }

    #[test]
    fn test_parse_added_placement() {
        let parsed = parse_added_placement(["zone=migration", "team=migration"]).unwrap();
        assert_eq!(parsed, map(&[("zone", "migration"), ("team", "migration")]));

        let empty = parse_added_placement(Vec::<String>::new()).unwrap();
        assert!(empty.is_empty());

        let overwritten = parse_added_placement(["team=a", "team=b"]).unwrap();
        assert_eq!(overwritten, map(&[("team", "b")]));
    }

    #[test]
    fn test_parse_added_placement_rejects_malformed_entries() {
        assert_eq!(
            parse_added_placement(["zone=vmi", "team"]),
            Err(ValidationError::MalformedEntry {
                entry: "team".into()
            })
        );
        assert_eq!(
            parse_added_placement(["a=b=c"]),
            Err(ValidationError::MalformedEntry {
                entry: "a=b=c".into()
            })
        );
        assert_eq!(
            parse_added_placement(["=vmi"]),
            Err(ValidationError::EmptyKey {
                entry: "=vmi".into()
            })
        );
        assert_eq!(
            parse_added_placement(["zone="]),
            Err(ValidationError::EmptyValue {
                entry: "zone=".into()
            })
        );
    }

    fn arb_map() -> impl Strategy<Value = PlacementMap> {
        prop::collection::btree_map("[a-e]{1,2}", "[a-z]{1,4}", 0..6)
    }

    proptest! {
        #[test]
        fn merge_never_overrides_base(base in arb_map(), addition in arb_map()) {
            let merged = merge(&base, &addition);
            for (key, value) in &base {
                prop_assert_eq!(merged.get(key), Some(value));
            }
        }

        #[test]
        fn merge_adds_unique_addition_keys(base in arb_map(), addition in arb_map()) {
            let merged = merge(&base, &addition);
            for (key, value) in &addition {
                if !base.contains_key(key) {
                    prop_assert_eq!(merged.get(key), Some(value));
                }
            }
            prop_assert!(merged.keys().all(|k| base.contains_key(k) || addition.contains_key(k)));
        }

        #[test]
        fn merge_with_empty_addition_is_identity(base in arb_map()) {
            prop_assert_eq!(merge(&base, &PlacementMap::new()), base);
        }

        #[test]
        fn merged_selector_only_restricts(base in arb_map(), addition in arb_map()) {
            // Any node eligible under the merged selector is eligible under the base.
            let merged = merge(&base, &addition);
            let node = Node {
                name: "n".into(),
                labels: merged.clone(),
            };
            prop_assert!(node.satisfies(&base));
        }
    }
}
