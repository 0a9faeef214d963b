//! Entity and graph validation.
//!
//! Per-entity checks gate records as workers parse them; the
//! cross-entity pass (broken references, orphans) runs once over the
//! deduplicated graph.

use std::collections::BTreeSet;

use crate::config::ValidationConfig;
use crate::model::{Entity, Severity, ValidationIssue, is_valid_type_name, is_valid_urn};

/// Validates entities against the configured rules.
#[derive(Debug, Clone)]
pub struct EntityValidator {
    config: ValidationConfig,
}

impl EntityValidator {
    /// Creates a validator from configuration.
    #[must_use]
    pub const fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Runs the local (single-entity) checks.
    #[must_use]
    pub fn validate_entity(&self, entity: &Entity) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        self.check_required_fields(entity, &mut issues);
        self.check_urn_format(entity, &mut issues);
        Self::check_type_name(entity, &mut issues);
        issues
    }

    /// Runs the cross-entity checks over the final graph.
    ///
    /// Re-runs the per-entity checks (values may have changed during
    /// merging), then detects broken references and orphans when
    /// enabled.
    #[must_use]
    pub fn validate_graph(&self, entities: &[Entity]) -> Vec<ValidationIssue> {
        let entity_ids: BTreeSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        let mut issues = Vec::new();

        for entity in entities {
            issues.extend(self.validate_entity(entity));

            let mut referenced = entity.referenced_urns();
            referenced.remove(&entity.id);

            if self.config.detect_broken_refs {
                for urn in &referenced {
                    if !entity_ids.contains(urn.as_str()) {
                        issues.push(ValidationIssue::error(
                            &entity.id,
                            "reference",
                            format!("references non-existent entity: {urn}"),
                        ));
                    }
                }
            }

            if self.config.detect_orphans {
                let has_resolving_ref = referenced
                    .iter()
                    .any(|urn| entity_ids.contains(urn.as_str()));
                if !has_resolving_ref {
                    issues.push(ValidationIssue::warning(
                        &entity.id,
                        "relationships",
                        "entity has no relationships to other entities (orphaned)",
                    ));
                }
            }
        }

        issues
    }

    fn check_required_fields(&self, entity: &Entity, issues: &mut Vec<ValidationIssue>) {
        for field in &self.config.required_fields {
            let present = match field.as_str() {
                "@id" => !entity.id.is_empty(),
                "@type" => !entity.entity_type.is_empty(),
                "name" => !entity.name.is_empty(),
                "description" => entity.description.is_some(),
                other => entity.properties.contains_key(other),
            };
            if present {
                continue;
            }
            if field == "name" && self.config.allow_missing_name {
                issues.push(ValidationIssue::warning(
                    &entity.id,
                    field,
                    format!("missing optional field: {field}"),
                ));
            } else {
                issues.push(ValidationIssue::error(
                    &entity.id,
                    field,
                    format!("missing required field: {field}"),
                ));
            }
        }
    }

    fn check_urn_format(&self, entity: &Entity, issues: &mut Vec<ValidationIssue>) {
        let urn = &entity.id;
        if self.config.strict_urn_format {
            if !urn.starts_with("urn:") {
                issues.push(ValidationIssue::error(
                    urn,
                    "@id",
                    "URN must start with 'urn:'",
                ));
            } else if !is_valid_urn(urn) {
                issues.push(ValidationIssue::error(
                    urn,
                    "@id",
                    "URN must have format 'urn:Type:identifier'",
                ));
            }
        } else if !urn.starts_with("urn:") && urn.contains(':') {
            issues.push(ValidationIssue::warning(
                urn,
                "@id",
                "URN should preferably start with 'urn:'",
            ));
        }
    }

    fn check_type_name(entity: &Entity, issues: &mut Vec<ValidationIssue>) {
        let type_name = &entity.entity_type;
        if type_name.is_empty() {
            issues.push(ValidationIssue::error(
                &entity.id,
                "@type",
                "type name cannot be empty",
            ));
            return;
        }
        if !is_valid_type_name(type_name) {
            issues.push(ValidationIssue::error(
                &entity.id,
                "@type",
                format!("invalid type name: {type_name}"),
            ));
        }
    }
}

/// Counts error-severity issues.
#[must_use]
pub fn error_count(issues: &[ValidationIssue]) -> usize {
    issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .count()
}
