//! JSON-LD graph emission.
//!
//! The final document is an object with a fixed `@context` and an
//! `@graph` array of entity records in first-insertion order. Writes
//! are atomic (temp file + rename) so a crashed run never leaves a
//! half-written graph behind.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde_json::{Value, json};
use tracing::info;

use crate::error::StoreError;
use crate::model::Entity;

/// A complete JSON-LD graph document.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonLdGraph {
    context: Value,
    graph: Vec<Value>,
}

impl Default for JsonLdGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonLdGraph {
    /// Creates an empty graph with the standard context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            context: json!({"@vocab": "http://schema.org/"}),
            graph: Vec::new(),
        }
    }

    /// Builds a graph from entities, rendering each to JSON-LD in
    /// order.
    #[must_use]
    pub fn from_entities(entities: &[Entity]) -> Self {
        let mut doc = Self::new();
        for entity in entities {
            doc.graph.push(entity.to_jsonld());
        }
        doc
    }

    /// Number of records in the graph.
    #[must_use]
    pub const fn entity_count(&self) -> usize {
        self.graph.len()
    }

    /// Unique entity types present in the graph.
    #[must_use]
    pub fn types(&self) -> BTreeSet<String> {
        self.graph
            .iter()
            .filter_map(|e| e.get("@type").and_then(Value::as_str))
            .map(ToString::to_string)
            .collect()
    }

    /// Parses the graph records back into entities.
    ///
    /// Records that fail structural parsing are skipped; the validator
    /// is the place to surface those as issues.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.graph
            .iter()
            .filter_map(|record| Entity::from_jsonld(record).ok())
            .collect()
    }

    /// Renders the document as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] on render failure.
    pub fn to_string_pretty(&self) -> Result<String, StoreError> {
        let doc = json!({
            "@context": self.context,
            "@graph": self.graph,
        });
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Writes the document atomically (temp file + rename), creating
    /// parent directories as needed. UTF-8, no BOM.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on serialization or I/O failure.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, &e))?;
        }

        let temp = path.with_extension("jsonld.tmp");
        fs::write(&temp, self.to_string_pretty()?).map_err(|e| io_error(&temp, &e))?;
        fs::rename(&temp, path).map_err(|e| io_error(path, &e))?;

        info!(path = %path.display(), entities = self.entity_count(), "graph written");
        Ok(())
    }

    /// Loads a graph document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O or parse failure.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let contents = fs::read_to_string(path).map_err(|e| io_error(path, &e))?;
        let doc: Value = serde_json::from_str(&contents)?;

        let context = doc
            .get("@context")
            .cloned()
            .unwrap_or_else(|| json!({"@vocab": "http://schema.org/"}));
        let graph = doc
            .get("@graph")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(Self { context, graph })
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}
