//! Prompt templates for extraction sessions.
//!
//! Templates ship compiled-in and can be overridden per-file from a
//! prompt directory. Rendering is plain `{{var}}` substitution; an
//! unresolved placeholder is an error rather than silent passthrough,
//! since a half-rendered prompt produces garbage extractions.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::ExtractionFailure;

#[allow(clippy::unwrap_used)]
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap());

/// Default system prompt for the extraction session.
pub const EXTRACTION_PROMPT: &str = r#"# Knowledge Graph Entity Extraction Task

You are an expert at extracting structured knowledge from configuration and documentation trees.

## Your Tools

- **read_file**: read file contents (supports offset/limit paging)
- **list_files**: find files matching a glob pattern
- **grep_files**: search file contents with a regex
- **submit_extraction_results**: submit your final results (REQUIRED)

## Data Files to Process

{{file_paths}}

{{schema_guidance}}

## Extraction Process

1. Use read_file to load and analyze each data file listed above.
2. Extract ALL entities with maximum fidelity. For each entity:
   - Generate a valid URN identifier: `urn:Type:identifier` (e.g. `urn:Service:payment-api`)
   - Determine the entity type (e.g. Service, Team, API, Database)
   - Extract the name and description
   - Capture ALL relationships as predicates with `{"@id": "urn:..."}` references
3. Validate every entity:
   - Every entity must have `@id`, `@type`, and `name` fields
   - All URNs must follow the format `urn:Type:identifier`
   - All types must start with a capital letter and be alphanumeric
   - Express relationships as predicates, NOT as separate Relationship entities
4. Call submit_extraction_results exactly once with all entities and metadata.

## Critical Rules

1. Use the tools to access files - file contents are not inlined in this prompt.
2. No Relationship entities: express relationships as predicates only.
3. Complete extraction: extract ALL entities, do not truncate or skip.
4. You MUST return results through the submit_extraction_results tool.

Begin the extraction now by reading the files."#;

/// Default schema guidance when a schema directory is configured.
pub const SCHEMA_GUIDANCE_PROMPT: &str = r"## Schema Reference

Schema files are located in: `{{schema_dir}}`

First, use read_file to examine the schema files and understand the expected entity types.";

/// Default schema guidance when no schema directory is configured.
pub const SCHEMA_DISCOVERY_PROMPT: &str = r"## Schema Discovery

No schema provided. Discover entity types through pattern analysis of the data files.";

/// Default corrective prompt when the agent returned unparseable text.
pub const CORRECTIVE_PROMPT: &str = r#"Your previous response could not be parsed.

Return ONLY a JSON object with this exact structure, and nothing else - no prose, no markdown fences:

{"entities": [{"@id": "urn:Type:identifier", "@type": "Type", "name": "..."}], "metadata": {"entity_count": 0}}

Files to process:

{{file_paths}}"#;

/// The set of templates one extraction run uses.
#[derive(Debug, Clone)]
pub struct PromptSet {
    /// Main extraction template.
    pub extraction: String,
    /// JSON-only corrective retry template.
    pub corrective: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            extraction: EXTRACTION_PROMPT.to_string(),
            corrective: CORRECTIVE_PROMPT.to_string(),
        }
    }
}

impl PromptSet {
    /// Loads templates from a directory, falling back to the
    /// compiled-in defaults for any missing file.
    ///
    /// Recognized files: `extraction.md`, `corrective.md`.
    #[must_use]
    pub fn load(prompt_dir: Option<&Path>) -> Self {
        let mut set = Self::default();
        let Some(dir) = prompt_dir else {
            return set;
        };

        if let Ok(contents) = std::fs::read_to_string(dir.join("extraction.md")) {
            debug!(path = %dir.join("extraction.md").display(), "loaded extraction template");
            set.extraction = contents;
        }
        if let Ok(contents) = std::fs::read_to_string(dir.join("corrective.md")) {
            debug!(path = %dir.join("corrective.md").display(), "loaded corrective template");
            set.corrective = contents;
        }
        set
    }
}

/// Renders a template by substituting `{{var}}` placeholders.
///
/// # Errors
///
/// Returns [`ExtractionFailure::Prompt`] when a placeholder has no
/// binding (rendering failures are non-retryable).
pub fn render_template(
    template: &str,
    vars: &BTreeMap<String, String>,
) -> Result<String, ExtractionFailure> {
    let mut missing: Vec<String> = Vec::new();
    let rendered = PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            vars.get(key).cloned().unwrap_or_else(|| {
                missing.push(key.to_string());
                String::new()
            })
        })
        .into_owned();

    if missing.is_empty() {
        Ok(rendered)
    } else {
        Err(ExtractionFailure::Prompt {
            message: format!("unresolved template variables: {}", missing.join(", ")),
        })
    }
}
