//! URN-keyed deduplication.
//!
//! Collapses entity records sharing a URN into one according to the
//! configured merge policy, preserving first-insertion order of URNs
//! so output is stable regardless of chunk completion order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DeduplicationConfig, MergeStrategy};
use crate::model::{Entity, PropertyValue};

/// Metrics about one deduplication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupMetrics {
    /// Entities before deduplication.
    pub input_count: usize,
    /// Entities after deduplication.
    pub output_count: usize,
    /// Duplicate records identified.
    pub duplicates_found: usize,
    /// Duplicate records merged away.
    pub duplicates_merged: usize,
    /// Property-merge operations performed.
    pub merge_operations: usize,
}

/// Result of one deduplication pass.
#[derive(Debug, Clone)]
pub struct DedupResult {
    /// Deduplicated entities in first-insertion URN order.
    pub entities: Vec<Entity>,
    /// Pass metrics.
    pub metrics: DedupMetrics,
}

/// URN-based deduplication strategy.
#[derive(Debug, Clone)]
pub struct UrnDeduplicator {
    config: DeduplicationConfig,
}

impl UrnDeduplicator {
    /// Creates a deduplicator from configuration.
    #[must_use]
    pub const fn new(config: DeduplicationConfig) -> Self {
        Self { config }
    }

    /// Deduplicates entities by URN.
    #[must_use]
    pub fn deduplicate(&self, entities: Vec<Entity>) -> DedupResult {
        let input_count = entities.len();
        if entities.is_empty() {
            return DedupResult {
                entities: Vec::new(),
                metrics: DedupMetrics::default(),
            };
        }

        // Group by URN, preserving order of first occurrence
        let mut groups: IndexMap<String, Vec<Entity>> = IndexMap::new();
        for entity in entities {
            groups.entry(entity.id.clone()).or_default().push(entity);
        }

        let mut deduplicated = Vec::with_capacity(groups.len());
        let mut duplicates_found = 0;
        let mut duplicates_merged = 0;
        let mut merge_operations = 0;

        for (_, mut group) in groups {
            if group.len() == 1 {
                deduplicated.extend(group);
                continue;
            }

            duplicates_found += group.len() - 1;
            duplicates_merged += group.len() - 1;

            match self.config.urn_merge_strategy {
                MergeStrategy::First => {
                    group.truncate(1);
                    deduplicated.extend(group);
                }
                MergeStrategy::Last => {
                    if let Some(last) = group.pop() {
                        deduplicated.push(last);
                    }
                }
                MergeStrategy::MergeProperties => {
                    merge_operations += group.len() - 1;
                    let mut drain = group.into_iter();
                    if let Some(base) = drain.next() {
                        deduplicated.push(merge_group(base, drain));
                    }
                }
            }
        }

        let metrics = DedupMetrics {
            input_count,
            output_count: deduplicated.len(),
            duplicates_found,
            duplicates_merged,
            merge_operations,
        };
        debug!(
            input = metrics.input_count,
            output = metrics.output_count,
            duplicates = metrics.duplicates_found,
            "deduplication complete"
        );

        DedupResult {
            entities: deduplicated,
            metrics,
        }
    }
}

/// Merges a group of records with the same URN into one.
///
/// Starts from the first record. The latest non-null description wins.
/// Conflicting property values collect into lists, deduplicated by
/// value equality.
fn merge_group(mut base: Entity, rest: impl Iterator<Item = Entity>) -> Entity {
    for entity in rest {
        if entity.description.is_some() {
            base.description = entity.description;
        }

        for (key, value) in entity.properties {
            match base.properties.get_mut(&key) {
                None => {
                    base.properties.insert(key, value);
                }
                Some(existing) if *existing == value => {}
                Some(PropertyValue::List(items)) => {
                    if !items.contains(&value) {
                        items.push(value);
                    }
                }
                Some(existing) => {
                    let old = existing.clone();
                    *existing = PropertyValue::List(vec![old, value]);
                }
            }
        }
    }

    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedupStrategy;
    use serde_json::json;

    fn entity(value: serde_json::Value) -> Entity {
        match Entity::from_jsonld(&value) {
            Ok(e) => e,
            Err(e) => unreachable!("entity parse failed: {}", e.message),
        }
    }

    fn dedup_with(strategy: MergeStrategy) -> UrnDeduplicator {
        UrnDeduplicator::new(DeduplicationConfig {
            strategy: DedupStrategy::Urn,
            urn_merge_strategy: strategy,
        })
    }

    #[test]
    fn test_empty_input() {
        let result = dedup_with(MergeStrategy::MergeProperties).deduplicate(vec![]);
        assert!(result.entities.is_empty());
        assert_eq!(result.metrics, DedupMetrics::default());
    }

    #[test]
    fn test_no_duplicates_passthrough() {
        let entities = vec![
            entity(json!({"@id": "urn:Service:a", "@type": "Service", "name": "A"})),
            entity(json!({"@id": "urn:Service:b", "@type": "Service", "name": "B"})),
        ];
        let result = dedup_with(MergeStrategy::MergeProperties).deduplicate(entities.clone());
        assert_eq!(result.entities, entities);
        assert_eq!(result.metrics.duplicates_found, 0);
        assert_eq!(result.metrics.input_count, 2);
        assert_eq!(result.metrics.output_count, 2);
    }

    #[test]
    fn test_first_strategy() {
        let entities = vec![
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": "us"})),
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": "eu"})),
        ];
        let result = dedup_with(MergeStrategy::First).deduplicate(entities);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(
            result.entities[0].properties.get("region"),
            Some(&PropertyValue::String("us".to_string()))
        );
    }

    #[test]
    fn test_last_strategy() {
        let entities = vec![
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": "us"})),
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": "eu"})),
        ];
        let result = dedup_with(MergeStrategy::Last).deduplicate(entities);
        assert_eq!(
            result.entities[0].properties.get("region"),
            Some(&PropertyValue::String("eu".to_string()))
        );
    }

    #[test]
    fn test_merge_conflicting_scalars_promote_to_list() {
        let entities = vec![
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": "us"})),
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": "eu"})),
        ];
        let result = dedup_with(MergeStrategy::MergeProperties).deduplicate(entities);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(
            result.entities[0].properties.get("region"),
            Some(&PropertyValue::List(vec![
                PropertyValue::String("us".to_string()),
                PropertyValue::String("eu".to_string()),
            ]))
        );
        assert_eq!(result.metrics.duplicates_found, 1);
        assert_eq!(result.metrics.merge_operations, 1);
    }

    #[test]
    fn test_merge_equal_values_no_list() {
        let entities = vec![
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": "us"})),
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": "us"})),
        ];
        let result = dedup_with(MergeStrategy::MergeProperties).deduplicate(entities);
        assert_eq!(
            result.entities[0].properties.get("region"),
            Some(&PropertyValue::String("us".to_string()))
        );
    }

    #[test]
    fn test_merge_appends_to_existing_list_without_dupes() {
        let entities = vec![
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X",
                          "tags": ["a", "b"]})),
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X",
                          "tags": "b"})),
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X",
                          "tags": "c"})),
        ];
        let result = dedup_with(MergeStrategy::MergeProperties).deduplicate(entities);
        let tags = result.entities[0].properties.get("tags");
        assert_eq!(
            tags,
            Some(&PropertyValue::List(vec![
                PropertyValue::String("a".to_string()),
                PropertyValue::String("b".to_string()),
                PropertyValue::String("c".to_string()),
            ]))
        );
    }

    #[test]
    fn test_merge_new_properties_added() {
        let entities = vec![
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": "us"})),
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "tier": "gold"})),
        ];
        let result = dedup_with(MergeStrategy::MergeProperties).deduplicate(entities);
        assert_eq!(result.entities[0].properties.len(), 2);
    }

    #[test]
    fn test_latest_description_wins() {
        let entities = vec![
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X",
                          "description": "older"})),
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X",
                          "description": "newer"})),
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X"})),
        ];
        let result = dedup_with(MergeStrategy::MergeProperties).deduplicate(entities);
        assert_eq!(result.entities[0].description.as_deref(), Some("newer"));
    }

    #[test]
    fn test_first_insertion_order_preserved() {
        let entities = vec![
            entity(json!({"@id": "urn:Service:b", "@type": "Service", "name": "B"})),
            entity(json!({"@id": "urn:Service:a", "@type": "Service", "name": "A"})),
            entity(json!({"@id": "urn:Service:b", "@type": "Service", "name": "B"})),
        ];
        let result = dedup_with(MergeStrategy::MergeProperties).deduplicate(entities);
        let ids: Vec<&str> = result.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["urn:Service:b", "urn:Service:a"]);
    }

    #[test]
    fn test_idempotence() {
        let entities = vec![
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": "us"})),
            entity(json!({"@id": "urn:Service:x", "@type": "Service", "name": "X", "region": "eu"})),
            entity(json!({"@id": "urn:Team:t", "@type": "Team", "name": "T"})),
        ];
        let deduper = dedup_with(MergeStrategy::MergeProperties);
        let once = deduper.deduplicate(entities);
        let twice = deduper.deduplicate(once.entities.clone());
        assert_eq!(once.entities, twice.entities);
        assert_eq!(twice.metrics.duplicates_found, 0);
    }

    #[cfg(test)]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_entity() -> impl Strategy<Value = Entity> {
            (0..5usize, proptest::option::of("[a-z]{1,6}")).prop_map(|(n, region)| {
                let mut record = json!({
                    "@id": format!("urn:Service:s{n}"),
                    "@type": "Service",
                    "name": format!("s{n}"),
                });
                if let Some(r) = region {
                    record["region"] = json!(r);
                }
                match Entity::from_jsonld(&record) {
                    Ok(e) => e,
                    Err(_) => unreachable!(),
                }
            })
        }

        proptest! {
            // dedupe(dedupe(x)) == dedupe(x)
            #[test]
            fn dedup_is_idempotent(entities in proptest::collection::vec(arb_entity(), 0..30)) {
                let deduper = dedup_with(MergeStrategy::MergeProperties);
                let once = deduper.deduplicate(entities);
                let twice = deduper.deduplicate(once.entities.clone());
                prop_assert_eq!(once.entities, twice.entities);
            }

            // every output URN is unique
            #[test]
            fn dedup_output_urns_unique(entities in proptest::collection::vec(arb_entity(), 0..30)) {
                let deduper = dedup_with(MergeStrategy::MergeProperties);
                let result = deduper.deduplicate(entities);
                let mut ids: Vec<&str> = result.entities.iter().map(|e| e.id.as_str()).collect();
                let total = ids.len();
                ids.sort_unstable();
                ids.dedup();
                prop_assert_eq!(ids.len(), total);
            }
        }
    }
}
