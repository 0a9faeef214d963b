//! Entity model and property value normalization.
//!
//! An entity is one node of the knowledge graph: a URN identifier, a
//! type, a name, and an ordered bag of property values. Property
//! values form a small discriminated union so references stay typed
//! all the way to emission.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// URN pattern: `urn:<Type>:<identifier>` with at least three parts.
#[allow(clippy::unwrap_used)]
static URN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^urn:[A-Z][A-Za-z0-9_]*:.+$").unwrap());

/// Type pattern: alphanumeric (underscores allowed), leading capital.
#[allow(clippy::unwrap_used)]
static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9_]*$").unwrap());

/// Returns `true` when `urn` matches `urn:<Type>:<identifier>`.
#[must_use]
pub fn is_valid_urn(urn: &str) -> bool {
    URN_RE.is_match(urn)
}

/// Returns `true` when `name` is a valid entity type name.
#[must_use]
pub fn is_valid_type_name(name: &str) -> bool {
    TYPE_RE.is_match(name)
}

/// A reference to another entity by URN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityRef {
    /// Target entity URN.
    #[serde(rename = "@id")]
    pub id: String,
}

/// A property value on an entity.
///
/// Untagged so the serialized form is plain JSON. `Reference` is
/// declared before `Object` so `{"@id": ...}` maps deserialize as
/// references rather than generic objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// JSON null (dropped at normalization).
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Numeric scalar.
    Number(serde_json::Number),
    /// String scalar.
    String(String),
    /// Reference to another entity: `{"@id": "urn:..."}`.
    Reference(EntityRef),
    /// List of values (may mix scalars and references).
    List(Vec<PropertyValue>),
    /// Nested object.
    Object(IndexMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Converts a raw JSON value into a property value.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => {
                if map.len() == 1
                    && let Some(Value::String(id)) = map.get("@id")
                {
                    return Self::Reference(EntityRef { id: id.clone() });
                }
                Self::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, Self::from_json(v)))
                        .collect(),
                )
            }
        }
    }

    /// Renders this value back into plain JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Reference(r) => {
                let mut map = serde_json::Map::new();
                map.insert("@id".to_string(), Value::String(r.id.clone()));
                Value::Object(map)
            }
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Normalizes a value for emission.
    ///
    /// Drops nulls, flattens one level of accidental list-of-list
    /// nesting, rewrites bare `urn:` strings into references, and
    /// drops lists that normalize to empty. Returns `None` when the
    /// value normalizes away entirely.
    #[must_use]
    pub fn normalize(self) -> Option<Self> {
        match self {
            Self::Null => None,
            Self::String(s) if s.starts_with("urn:") => Some(Self::Reference(EntityRef { id: s })),
            Self::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        // Flatten one level of nested list
                        Self::List(nested) => {
                            for inner in nested {
                                if let Some(v) = inner.normalize() {
                                    out.push(v);
                                }
                            }
                        }
                        other => {
                            if let Some(v) = other.normalize() {
                                out.push(v);
                            }
                        }
                    }
                }
                if out.is_empty() { None } else { Some(Self::List(out)) }
            }
            Self::Object(map) => {
                let normalized: IndexMap<String, Self> = map
                    .into_iter()
                    .filter_map(|(k, v)| v.normalize().map(|v| (k, v)))
                    .collect();
                Some(Self::Object(normalized))
            }
            other => Some(other),
        }
    }

    /// Collects every URN referenced by this value, recursively.
    ///
    /// Both typed references and bare `urn:` strings count, so the
    /// validator sees broken links even in un-normalized records.
    pub fn collect_references(&self, urns: &mut BTreeSet<String>) {
        match self {
            Self::Reference(r) => {
                urns.insert(r.id.clone());
            }
            Self::String(s) if s.starts_with("urn:") => {
                urns.insert(s.clone());
            }
            Self::List(items) => {
                for item in items {
                    item.collect_references(urns);
                }
            }
            Self::Object(map) => {
                for value in map.values() {
                    value.collect_references(urns);
                }
            }
            _ => {}
        }
    }
}

/// Error describing why an entity record could not be parsed.
#[derive(Debug, Clone)]
pub struct EntityParseError {
    /// The field that failed (`@id`, `@type`, or `name`).
    pub field: &'static str,
    /// Human-readable reason.
    pub message: String,
    /// The `@id` of the offending record, when present.
    pub entity_id: String,
}

/// One node of the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// URN identifier: `urn:<Type>:<identifier>`.
    pub id: String,
    /// Entity type; matches the URN type segment pattern.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered property bag. Keys never start with `@`.
    #[serde(default)]
    pub properties: IndexMap<String, PropertyValue>,
}

/// Keys on a JSON-LD record that map to dedicated entity fields.
const RESERVED_KEYS: &[&str] = &["@id", "@type", "name", "description", "@context"];

impl Entity {
    /// Parses one JSON-LD record (as submitted by the agent).
    ///
    /// # Errors
    ///
    /// Returns [`EntityParseError`] when `@id`, `@type`, or `name` is
    /// missing or fails its format check. Property keys starting with
    /// `@` are dropped rather than stored.
    pub fn from_jsonld(record: &Value) -> Result<Self, EntityParseError> {
        let obj = record.as_object().ok_or_else(|| EntityParseError {
            field: "@id",
            message: "entity record is not an object".to_string(),
            entity_id: "unknown".to_string(),
        })?;

        let entity_id = obj
            .get("@id")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let id = obj
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| EntityParseError {
                field: "@id",
                message: "missing required field: @id".to_string(),
                entity_id: entity_id.clone(),
            })?
            .to_string();

        if !is_valid_urn(&id) {
            return Err(EntityParseError {
                field: "@id",
                message: format!("invalid URN format: {id}"),
                entity_id,
            });
        }

        let entity_type = obj
            .get("@type")
            .and_then(Value::as_str)
            .ok_or_else(|| EntityParseError {
                field: "@type",
                message: "missing required field: @type".to_string(),
                entity_id: entity_id.clone(),
            })?
            .to_string();

        if !is_valid_type_name(&entity_type) {
            return Err(EntityParseError {
                field: "@type",
                message: format!("invalid type name: {entity_type}"),
                entity_id,
            });
        }

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| EntityParseError {
                field: "name",
                message: "missing required field: name".to_string(),
                entity_id: entity_id.clone(),
            })?
            .to_string();

        if name.is_empty() {
            return Err(EntityParseError {
                field: "name",
                message: "name must be non-empty".to_string(),
                entity_id,
            });
        }

        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let properties = obj
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()) && !k.starts_with('@'))
            .map(|(k, v)| (k.clone(), PropertyValue::from_json(v.clone())))
            .collect();

        Ok(Self {
            id,
            entity_type,
            name,
            description,
            properties,
        })
    }

    /// Renders the entity as a JSON-LD record.
    ///
    /// Property values are normalized on the way out; values that
    /// normalize away (nulls, empty lists) are omitted.
    #[must_use]
    pub fn to_jsonld(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("@id".to_string(), Value::String(self.id.clone()));
        map.insert("@type".to_string(), Value::String(self.entity_type.clone()));
        map.insert("name".to_string(), Value::String(self.name.clone()));

        if let Some(ref description) = self.description
            && !description.is_empty()
        {
            map.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }

        for (key, value) in &self.properties {
            if key.starts_with('@') {
                continue;
            }
            if let Some(normalized) = value.clone().normalize() {
                map.insert(key.clone(), normalized.to_json());
            }
        }

        Value::Object(map)
    }

    /// Collects every URN this entity references through its
    /// properties (self-references included).
    #[must_use]
    pub fn referenced_urns(&self) -> BTreeSet<String> {
        let mut urns = BTreeSet::new();
        for value in self.properties.values() {
            value.collect_references(&mut urns);
        }
        urns
    }
}
