//! Tool type definitions for the extraction agent.
//!
//! Provides transport-agnostic types for tool definitions, calls, and
//! results, plus the schemas for the sandboxed file tools and the
//! structured submission tool.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Name of the structured submission tool.
pub const SUBMIT_TOOL_NAME: &str = "submit_extraction_results";

/// A tool definition that can be sent to an LLM for function-calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match the dispatch table in the executor).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema object describing the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call (assigned by the provider).
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments for the tool.
    pub arguments: String,
}

/// The result of executing a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this result corresponds to.
    pub tool_call_id: String,
    /// Result content (JSON string on success, error message on failure).
    pub content: String,
    /// Whether this result represents an error.
    pub is_error: bool,
}

/// A set of tool definitions scoped to one extraction session.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    definitions: Vec<ToolDefinition>,
}

impl ToolSet {
    /// Returns the tool definitions in this set.
    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Consumes the set, returning its definitions.
    #[must_use]
    pub fn into_definitions(self) -> Vec<ToolDefinition> {
        self.definitions
    }

    /// Returns `true` if this set contains no tools.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Returns the number of tools in this set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Tool set for an extraction session: the three sandboxed file
    /// tools plus the structured submission tool.
    #[must_use]
    pub fn extraction_tools() -> Self {
        Self {
            definitions: vec![
                def_read_file(),
                def_list_files(),
                def_grep_files(),
                def_submit_extraction_results(),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Tool schema definitions
// ---------------------------------------------------------------------------

/// Defines the `read_file` tool.
fn def_read_file() -> ToolDefinition {
    ToolDefinition {
        name: "read_file".to_string(),
        description: "Read the contents of a file under the data root. Returns the file text. \
                       Use offset/limit to page through large files."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path (absolute, or relative to the data root)."
                },
                "offset": {
                    "type": "integer",
                    "description": "Line to start reading from (0-based). Defaults to 0.",
                    "default": 0
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return."
                }
            },
            "required": ["path"],
            "additionalProperties": false
        }),
    }
}

/// Defines the `list_files` tool.
fn def_list_files() -> ToolDefinition {
    ToolDefinition {
        name: "list_files".to_string(),
        description: "Find files under the data root matching a glob pattern. Returns an array \
                       of paths relative to the data root."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. '**/*.yml'."
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        }),
    }
}

/// Defines the `grep_files` tool.
fn def_grep_files() -> ToolDefinition {
    ToolDefinition {
        name: "grep_files".to_string(),
        description: "Search file contents under the data root with a regex pattern. Returns \
                       matching lines with their file and line number."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for."
                },
                "glob": {
                    "type": "string",
                    "description": "Restrict the search to files matching this glob."
                },
                "max_matches": {
                    "type": "integer",
                    "description": "Maximum matches to return. Defaults to 100.",
                    "default": 100
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        }),
    }
}

/// Defines the `submit_extraction_results` tool.
///
/// This is the only sanctioned way for the agent to return extraction
/// results; the schema enforces URN and type formats at the submission
/// boundary.
#[must_use]
pub fn def_submit_extraction_results() -> ToolDefinition {
    ToolDefinition {
        name: SUBMIT_TOOL_NAME.to_string(),
        description: "Submit extraction results with entities and metadata. This is the ONLY \
                       way to return extraction results. You MUST use this tool to submit \
                       your findings."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "entities": {
                    "type": "array",
                    "description": "List of extracted entities with @id, @type, name, and predicates",
                    "items": {
                        "type": "object",
                        "required": ["@id", "@type", "name"],
                        "properties": {
                            "@id": {
                                "type": "string",
                                "pattern": "^urn:[A-Z][A-Za-z0-9_]*:.+$",
                                "description": "URN identifier (format: urn:Type:identifier)"
                            },
                            "@type": {
                                "type": "string",
                                "pattern": "^[A-Z][A-Za-z0-9_]*$",
                                "description": "Entity type (must start with capital letter)"
                            },
                            "name": {
                                "type": "string",
                                "minLength": 1,
                                "description": "Entity name"
                            },
                            "description": {
                                "type": "string",
                                "description": "Optional entity description"
                            }
                        },
                        "additionalProperties": true
                    }
                },
                "metadata": {
                    "type": "object",
                    "description": "Extraction metadata (entity_count, types_discovered, etc.)",
                    "properties": {
                        "entity_count": {
                            "type": "integer",
                            "description": "Total number of entities extracted"
                        },
                        "types_discovered": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "List of entity types found"
                        },
                        "files_processed": {
                            "type": "integer",
                            "description": "Number of files processed"
                        }
                    },
                    "additionalProperties": true
                }
            },
            "required": ["entities", "metadata"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_toolset() {
        let ts = ToolSet::extraction_tools();
        assert_eq!(ts.len(), 4);
        let names: Vec<&str> = ts.definitions().iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"read_file"));
        assert!(names.contains(&"list_files"));
        assert!(names.contains(&"grep_files"));
        assert!(names.contains(&SUBMIT_TOOL_NAME));
    }

    #[test]
    fn test_submit_schema_shape() {
        let def = def_submit_extraction_results();
        assert_eq!(def.parameters["required"], json!(["entities", "metadata"]));
        let entity_schema = &def.parameters["properties"]["entities"]["items"];
        assert_eq!(entity_schema["required"], json!(["@id", "@type", "name"]));
        assert_eq!(
            entity_schema["properties"]["@id"]["pattern"],
            "^urn:[A-Z][A-Za-z0-9_]*:.+$"
        );
        assert_eq!(entity_schema["additionalProperties"], json!(true));
    }

    #[test]
    fn test_all_definitions_have_valid_schemas() {
        let ts = ToolSet::extraction_tools();
        for def in ts.definitions() {
            assert!(!def.name.is_empty());
            assert!(!def.description.is_empty());
            assert!(def.parameters.is_object());
            assert_eq!(def.parameters["type"], "object");
        }
    }

    #[test]
    fn test_tool_call_serialization() {
        let call = ToolCall {
            id: "call_123".to_string(),
            name: "read_file".to_string(),
            arguments: r#"{"path":"services/app.yml"}"#.to_string(),
        };
        let json = serde_json::to_string(&call).unwrap_or_default();
        assert!(json.contains("call_123"));
        assert!(json.contains("read_file"));
    }
}
