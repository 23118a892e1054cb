//! Search tools: glob file search and grep-style content search.
//!
//! Both walk the tree under the search root (`workingdir`, or the process
//! directory) and match relative paths against a glob pattern.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::{required_str, search_root, Tool, ToolExecutionContext};

const DEFAULT_MAX_RESULTS: usize = 20;
const MAX_MATCHES_PER_FILE: usize = 10;
const MAX_LINE_CHARS: usize = 100;

/// Compile a glob into an anchored regex over `/`-separated relative paths.
///
/// `*` and `?` stay within one path component, `**/` spans any number of
/// directories (including none), a trailing `**` matches everything below,
/// and `[...]` / `[!...]` are character classes.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::from("^");
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;

    while let Some(c) = chars.next() {
        if in_class {
            match c {
                ']' => {
                    in_class = false;
                    source.push(']');
                }
                '\\' | '[' | '&' | '~' => {
                    source.push('\\');
                    source.push(c);
                }
                _ => source.push(c),
            }
            continue;
        }
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    source.push_str("(?:[^/]*/)*");
                } else {
                    source.push_str(".*");
                }
            }
            '*' => source.push_str("[^/]*"),
            '?' => source.push_str("[^/]"),
            '[' => {
                in_class = true;
                source.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    source.push('^');
                }
            }
            _ => source.push_str(&regex::escape(&c.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// `rel` with `/` separators on every platform.
fn slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reject patterns that could walk out of a confined root.
fn check_pattern(ctx: &ToolExecutionContext, pattern: &str, what: &str) -> Result<(), String> {
    let escapes = pattern.contains("..") || pattern.starts_with('/') || pattern.starts_with('\\');
    if escapes && ctx.working_dir().is_some() {
        return Err(format!(
            "Error: {} cannot contain '..' or absolute paths when working directory is restricted",
            what
        ));
    }
    Ok(())
}

/// Relative paths of every non-hidden file under `root` matching `pattern`, sorted.
fn matching_files(root: &Path, pattern: &Regex) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .filter(|rel| pattern.is_match(&slash_path(rel)))
        .collect()
}

fn max_results(args: &Value) -> usize {
    args["max_results"]
        .as_u64()
        .map(|n| n as usize)
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_MAX_RESULTS)
}

fn truncate_line(line: &str) -> String {
    if line.chars().count() > MAX_LINE_CHARS {
        let head: String = line.chars().take(MAX_LINE_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}

/// Find files by glob pattern.
pub struct FileSearch;

#[async_trait]
impl Tool for FileSearch {
    fn name(&self) -> &str {
        "filesys.file_search"
    }

    fn description(&self) -> &str {
        "Search for files in the workspace by glob pattern. Returns only the paths of matching files. Patterns match from the workspace root, e.g. '**/*.rs' for every Rust file or 'src/**' for everything under src."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern matched against paths relative to the workspace root"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default: 20)",
                    "default": 20
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let query = required_str(&args, "pattern")?;
        let limit = max_results(&args);
        if let Err(msg) = check_pattern(ctx, query, "Search pattern") {
            return Ok(msg);
        }
        let root = match search_root(ctx) {
            Ok(root) => root,
            Err(msg) => return Ok(msg),
        };
        let pattern = match glob_to_regex(query) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: Invalid glob pattern '{}': {}", query, e)),
        };

        tracing::info!("Searching for files [{}]", query);
        let found = tokio::task::spawn_blocking(move || matching_files(&root, &pattern)).await?;

        if found.is_empty() {
            return Ok(format!("No files found matching pattern: {}", query));
        }

        let truncated = if found.len() > limit {
            format!(" (showing first {} of {} matches)", limit, found.len())
        } else {
            String::new()
        };
        let listed: Vec<String> = found
            .iter()
            .take(limit)
            .map(|p| format!("  - {}", slash_path(p)))
            .collect();

        Ok(format!(
            "Found {} file(s) matching '{}':{}\n{}",
            listed.len(),
            query,
            truncated,
            listed.join("\n")
        ))
    }
}

/// Search file contents for text or a regex.
pub struct GrepSearch;

#[async_trait]
impl Tool for GrepSearch {
    fn name(&self) -> &str {
        "filesys.grep_search"
    }

    fn description(&self) -> &str {
        "Search for text within files. Supports plain text and regular expressions, case-insensitive. Results include file paths, line numbers and matching lines."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text pattern to search for (plain text or regex)"
                },
                "include_pattern": {
                    "type": "string",
                    "description": "Glob pattern for files to search in (default: '**/*')",
                    "default": "**/*"
                },
                "is_regexp": {
                    "type": "boolean",
                    "description": "Whether the query is a regular expression (default: false)",
                    "default": false
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default: 20)",
                    "default": 20
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let query = required_str(&args, "query")?;
        let include = args["include_pattern"].as_str().unwrap_or("**/*");
        let is_regexp = args["is_regexp"].as_bool().unwrap_or(false);
        let limit = max_results(&args);

        if let Err(msg) = check_pattern(ctx, include, "Include pattern") {
            return Ok(msg);
        }
        let root = match search_root(ctx) {
            Ok(root) => root,
            Err(msg) => return Ok(msg),
        };
        let include_glob = match glob_to_regex(include) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: Invalid glob pattern '{}': {}", include, e)),
        };
        let source = if is_regexp {
            query.to_string()
        } else {
            regex::escape(query)
        };
        let regex = match RegexBuilder::new(&source).case_insensitive(true).build() {
            Ok(r) => r,
            Err(e) => return Ok(format!("Invalid regular expression '{}': {}", query, e)),
        };

        tracing::info!("Searching for pattern [{}] in files matching [{}]", query, include);
        let report = tokio::task::spawn_blocking(move || {
            let files = matching_files(&root, &include_glob);
            if files.is_empty() {
                return None;
            }

            let mut lines = Vec::new();
            let mut total = 0usize;
            for rel in files {
                // Undecodable files are skipped like unreadable ones
                let Ok(content) = std::fs::read_to_string(root.join(&rel)) else {
                    continue;
                };
                let hits: Vec<(usize, &str)> = content
                    .lines()
                    .enumerate()
                    .filter(|(_, line)| regex.is_match(line))
                    .take(MAX_MATCHES_PER_FILE)
                    .map(|(i, line)| (i + 1, line.trim()))
                    .collect();
                if hits.is_empty() {
                    continue;
                }

                total += hits.len();
                lines.push(format!("File: {}", slash_path(&rel)));
                for (number, text) in hits {
                    lines.push(format!("  {}: {}", number, truncate_line(text)));
                }
                lines.push(String::new());

                if lines.len() >= limit * 2 {
                    break;
                }
            }
            Some((total, lines))
        })
        .await?;

        let Some((total, mut lines)) = report else {
            return Ok(format!("No files found matching pattern: {}", include));
        };

        if total > limit {
            lines.truncate(limit);
            lines.insert(0, format!("Found {} matches (showing first {}):", total, limit));
        } else {
            lines.insert(0, format!("Found {} matches:", total));
        }
        Ok(lines.join("\n"))
    }
}
