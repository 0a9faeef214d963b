//! Sandboxed file-tool executor.
//!
//! Dispatches the agent's file tool calls to direct filesystem reads
//! scoped to the data root. No subprocess, no network: tool names map
//! to Rust functions, and every path is checked against the sandbox
//! root before any I/O.

use std::path::{Path, PathBuf};

use glob::Pattern;
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::json;
use walkdir::WalkDir;

use super::tools::{ToolCall, ToolResult};
use crate::error::AgentError;

/// Maximum raw byte length of tool argument JSON from the LLM.
const MAX_TOOL_ARGS_LEN: usize = 100_000;
/// Maximum bytes returned by a single `read_file` call.
const MAX_READ_BYTES: usize = 262_144;
/// Maximum entries returned by `list_files`.
const MAX_LIST_ENTRIES: usize = 1_000;
/// Maximum matches returned by `grep_files`.
const MAX_GREP_MATCHES: usize = 1_000;
/// Maximum regex pattern length for `grep_files`.
const MAX_REGEX_LEN: usize = 500;
/// Maximum compiled regex DFA size (bytes).
const MAX_REGEX_DFA_SIZE: usize = 1_000_000;
/// Files larger than this are skipped by `grep_files`.
const MAX_GREP_FILE_BYTES: u64 = 4 * 1024 * 1024;

/// Executes file tool calls against a sandboxed data root.
#[derive(Debug, Clone)]
pub struct FileToolExecutor {
    root: PathBuf,
}

impl FileToolExecutor {
    /// Creates an executor rooted at `data_root`.
    ///
    /// The root is canonicalized once so symlinked roots still resolve
    /// consistently for the traversal check.
    #[must_use]
    pub fn new(data_root: &Path) -> Self {
        let root = data_root
            .canonicalize()
            .unwrap_or_else(|_| data_root.to_path_buf());
        Self { root }
    }

    /// Dispatches a tool call to the appropriate function.
    ///
    /// Validates raw argument size before dispatch to prevent
    /// oversized payloads.
    #[must_use]
    pub fn execute(&self, call: &ToolCall) -> ToolResult {
        if call.arguments.len() > MAX_TOOL_ARGS_LEN {
            return ToolResult {
                tool_call_id: call.id.clone(),
                content: format!(
                    "tool arguments too large ({} bytes, max {MAX_TOOL_ARGS_LEN})",
                    call.arguments.len()
                ),
                is_error: true,
            };
        }

        let result = match call.name.as_str() {
            "read_file" => self.tool_read_file(&call.arguments),
            "list_files" => self.tool_list_files(&call.arguments),
            "grep_files" => self.tool_grep_files(&call.arguments),
            other => Err(AgentError::ToolExecution {
                name: other.to_string(),
                message: "unknown tool".to_string(),
            }),
        };

        match result {
            Ok(content) => ToolResult {
                tool_call_id: call.id.clone(),
                content,
                is_error: false,
            },
            Err(e) => ToolResult {
                tool_call_id: call.id.clone(),
                content: e.to_string(),
                is_error: true,
            },
        }
    }

    /// Resolves a caller-supplied path inside the sandbox root.
    fn resolve(&self, tool: &str, raw: &str) -> Result<PathBuf, AgentError> {
        let candidate = Path::new(raw);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let resolved = joined.canonicalize().map_err(|e| AgentError::ToolExecution {
            name: tool.to_string(),
            message: format!("cannot resolve path '{raw}': {e}"),
        })?;

        if !resolved.starts_with(&self.root) {
            return Err(AgentError::ToolExecution {
                name: tool.to_string(),
                message: format!("path traversal denied: {raw}"),
            });
        }
        Ok(resolved)
    }

    // -----------------------------------------------------------------------
    // Tool implementations
    // -----------------------------------------------------------------------

    /// Reads a file, optionally paging by line offset/limit.
    fn tool_read_file(&self, args: &str) -> Result<String, AgentError> {
        #[derive(Deserialize)]
        struct Args {
            path: String,
            #[serde(default)]
            offset: usize,
            limit: Option<usize>,
        }
        let args: Args = parse_args("read_file", args)?;
        let path = self.resolve("read_file", &args.path)?;

        let contents = std::fs::read_to_string(&path).map_err(|e| AgentError::ToolExecution {
            name: "read_file".to_string(),
            message: format!("failed to read {}: {e}", path.display()),
        })?;

        let selected: String = match args.limit {
            Some(limit) => contents
                .lines()
                .skip(args.offset)
                .take(limit)
                .collect::<Vec<_>>()
                .join("\n"),
            None if args.offset > 0 => contents
                .lines()
                .skip(args.offset)
                .collect::<Vec<_>>()
                .join("\n"),
            None => contents,
        };

        if selected.len() > MAX_READ_BYTES {
            let mut end = MAX_READ_BYTES;
            while !selected.is_char_boundary(end) {
                end -= 1;
            }
            return Ok(format!(
                "{}\n… truncated at {MAX_READ_BYTES} bytes; use offset/limit to page",
                &selected[..end]
            ));
        }
        Ok(selected)
    }

    /// Lists files matching a glob, relative to the root.
    fn tool_list_files(&self, args: &str) -> Result<String, AgentError> {
        #[derive(Deserialize)]
        struct Args {
            pattern: String,
        }
        let args: Args = parse_args("list_files", args)?;

        let pattern = Pattern::new(&args.pattern).map_err(|e| AgentError::ToolExecution {
            name: "list_files".to_string(),
            message: format!("invalid glob '{}': {e}", args.pattern),
        })?;

        let mut paths: Vec<String> = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.root).ok()?;
                pattern
                    .matches_path(relative)
                    .then(|| relative.display().to_string())
            })
            .take(MAX_LIST_ENTRIES)
            .collect();
        paths.sort();

        serde_json::to_string(&paths).map_err(|e| AgentError::ToolExecution {
            name: "list_files".to_string(),
            message: format!("serialization failed: {e}"),
        })
    }

    /// Searches file contents with a regex.
    fn tool_grep_files(&self, args: &str) -> Result<String, AgentError> {
        #[derive(Deserialize)]
        struct Args {
            pattern: String,
            glob: Option<String>,
            max_matches: Option<usize>,
        }
        let args: Args = parse_args("grep_files", args)?;

        if args.pattern.len() > MAX_REGEX_LEN {
            return Err(AgentError::ToolExecution {
                name: "grep_files".to_string(),
                message: format!(
                    "pattern too long ({} chars, max {MAX_REGEX_LEN})",
                    args.pattern.len()
                ),
            });
        }

        let regex = RegexBuilder::new(&args.pattern)
            .size_limit(MAX_REGEX_DFA_SIZE)
            .build()
            .map_err(|e| AgentError::ToolExecution {
                name: "grep_files".to_string(),
                message: format!("invalid regex: {e}"),
            })?;

        let file_filter = match args.glob {
            Some(ref g) => Some(Pattern::new(g).map_err(|e| AgentError::ToolExecution {
                name: "grep_files".to_string(),
                message: format!("invalid glob '{g}': {e}"),
            })?),
            None => None,
        };

        let limit = args.max_matches.unwrap_or(100).min(MAX_GREP_MATCHES);
        let mut matches = Vec::new();

        'files: for entry in WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if let Some(ref filter) = file_filter
                && !filter.matches_path(relative)
            {
                continue;
            }
            if entry.metadata().is_ok_and(|m| m.len() > MAX_GREP_FILE_BYTES) {
                continue;
            }
            let Ok(contents) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            for (line_number, line) in contents.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(json!({
                        "file": relative.display().to_string(),
                        "line": line_number + 1,
                        "text": line,
                    }));
                    if matches.len() >= limit {
                        break 'files;
                    }
                }
            }
        }

        serde_json::to_string(&matches).map_err(|e| AgentError::ToolExecution {
            name: "grep_files".to_string(),
            message: format!("serialization failed: {e}"),
        })
    }
}

fn parse_args<'a, T: Deserialize<'a>>(tool: &str, args: &'a str) -> Result<T, AgentError> {
    serde_json::from_str(args).map_err(|e| AgentError::ToolExecution {
        name: tool.to_string(),
        message: format!("invalid arguments: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
        }
    }

    fn setup() -> tempfile::TempDir {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => unreachable!("tempdir failed: {e}"),
        };
        let _ = fs::create_dir_all(dir.path().join("services"));
        let _ = fs::write(
            dir.path().join("services/app.yml"),
            "name: payment-api\nowner: alice@example.com\n",
        );
        let _ = fs::write(dir.path().join("readme.md"), "# Data\n");
        dir
    }

    #[test]
    fn test_read_file_relative_path() {
        let dir = setup();
        let executor = FileToolExecutor::new(dir.path());
        let result = executor.execute(&call("read_file", json!({"path": "services/app.yml"})));
        assert!(!result.is_error);
        assert!(result.content.contains("payment-api"));
    }

    #[test]
    fn test_read_file_with_offset_limit() {
        let dir = setup();
        let executor = FileToolExecutor::new(dir.path());
        let result = executor.execute(&call(
            "read_file",
            json!({"path": "services/app.yml", "offset": 1, "limit": 1}),
        ));
        assert!(!result.is_error);
        assert_eq!(result.content, "owner: alice@example.com");
    }

    #[test]
    fn test_path_traversal_denied() {
        let dir = setup();
        let executor = FileToolExecutor::new(dir.path());
        let result = executor.execute(&call("read_file", json!({"path": "../../etc/passwd"})));
        assert!(result.is_error);
    }

    #[test]
    fn test_list_files_glob() {
        let dir = setup();
        let executor = FileToolExecutor::new(dir.path());
        let result = executor.execute(&call("list_files", json!({"pattern": "**/*.yml"})));
        assert!(!result.is_error);
        let paths: Vec<String> = serde_json::from_str(&result.content).unwrap_or_default();
        assert_eq!(paths, vec!["services/app.yml".to_string()]);
    }

    #[test]
    fn test_grep_files() {
        let dir = setup();
        let executor = FileToolExecutor::new(dir.path());
        let result = executor.execute(&call("grep_files", json!({"pattern": "owner:"})));
        assert!(!result.is_error);
        let matches: Vec<serde_json::Value> =
            serde_json::from_str(&result.content).unwrap_or_default();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["line"], 2);
    }

    #[test]
    fn test_grep_rejects_bad_regex() {
        let dir = setup();
        let executor = FileToolExecutor::new(dir.path());
        let result = executor.execute(&call("grep_files", json!({"pattern": "[unclosed"})));
        assert!(result.is_error);
    }

    #[test]
    fn test_unknown_tool() {
        let dir = setup();
        let executor = FileToolExecutor::new(dir.path());
        let result = executor.execute(&call("write_file", json!({})));
        assert!(result.is_error);
        assert!(result.content.contains("unknown tool"));
    }

    #[test]
    fn test_oversized_arguments_rejected() {
        let dir = setup();
        let executor = FileToolExecutor::new(dir.path());
        let huge = "x".repeat(MAX_TOOL_ARGS_LEN + 1);
        let result = executor.execute(&ToolCall {
            id: "call_1".to_string(),
            name: "read_file".to_string(),
            arguments: huge,
        });
        assert!(result.is_error);
        assert!(result.content.contains("too large"));
    }
}
