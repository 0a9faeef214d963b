//! Shared data model for the extraction pipeline.
//!
//! Entities are the unit of knowledge, identified by URN and carrying
//! an ordered bag of typed property values. Validation issues and
//! metrics flow alongside entities through every pipeline stage.

pub mod entity;
pub mod issue;
pub mod metrics;

pub use entity::{Entity, EntityParseError, EntityRef, PropertyValue, is_valid_type_name, is_valid_urn};
pub use issue::{Severity, ValidationIssue};
pub use metrics::{ExtractionMetrics, TokenUsage, UsageMeter};

/// Result of extracting entities from a single chunk.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    /// Identifier of the chunk that was processed.
    pub chunk_id: String,
    /// Entities extracted from this chunk.
    pub entities: Vec<Entity>,
    /// Validation issues encountered while parsing the submission.
    pub validation_issues: Vec<ValidationIssue>,
    /// Token usage reported by the agent session.
    pub usage: TokenUsage,
    /// Submission metadata (entity counts, types discovered, etc.).
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_result_default() {
        let result = ExtractionResult::default();
        assert!(result.chunk_id.is_empty());
        assert!(result.entities.is_empty());
        assert!(result.validation_issues.is_empty());
    }
}
