//! Markdown prompt templates.
//!
//! A prompt lives in `{dir}/{name}.md`. An optional frontmatter block
//! delimited by `---` lines carries `key: value` metadata (`type`,
//! `description`); the body may reference parameters as `{{NAME}}`.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;

const PARAMETER_PATTERN: &str = r"\{\{(\w+)\}\}";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt file '{name}.md' not found in {}", dir.display())]
    NotFound { name: String, dir: PathBuf },

    #[error("Failed to read prompt: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameter pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A loaded, rendered prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    /// Frontmatter `type`, `system` when absent
    pub kind: String,
    pub description: String,
    pub content: String,
}

fn prompt_path(dir: &Path, name: &str) -> Result<PathBuf, PromptError> {
    let path = dir.join(format!("{}.md", name));
    if !path.is_file() {
        return Err(PromptError::NotFound {
            name: name.to_string(),
            dir: dir.to_path_buf(),
        });
    }
    Ok(path)
}

/// Split `---` frontmatter from the body. Unterminated frontmatter is body.
fn split_frontmatter(content: &str) -> (HashMap<String, String>, String) {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut metadata = HashMap::new();

    if lines.first().map(|l| l.trim()) != Some("---") {
        return (metadata, content.trim().to_string());
    }
    let Some(end) = lines.iter().skip(1).position(|l| *l == "---").map(|i| i + 1) else {
        return (metadata, content.trim().to_string());
    };

    for line in &lines[1..end] {
        if let Some((key, value)) = line.trim().split_once(':') {
            metadata.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    (metadata, lines[end + 1..].join("\n").trim().to_string())
}

/// Substitute `{{KEY}}` for every entry in `params`. Unknown placeholders stay.
pub fn render(body: &str, params: &HashMap<String, String>) -> String {
    params.iter().fold(body.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key), value)
    })
}

/// Load and render `{dir}/{name}.md`.
///
/// # Errors
/// `NotFound` when the file is missing, `Io` when it cannot be read.
pub fn load_prompt(
    dir: &Path,
    name: &str,
    params: &HashMap<String, String>,
) -> Result<Prompt, PromptError> {
    let content = std::fs::read_to_string(prompt_path(dir, name)?)?;
    let (mut metadata, body) = split_frontmatter(&content);
    tracing::debug!(prompt = name, params = params.len(), "Loaded prompt");

    Ok(Prompt {
        kind: metadata
            .remove("type")
            .unwrap_or_else(|| "system".to_string()),
        description: metadata.remove("description").unwrap_or_default(),
        content: render(&body, params),
    })
}

/// Names of every `{{PARAM}}` placeholder in a prompt's body, sorted.
pub fn get_parameters(dir: &Path, name: &str) -> Result<Vec<String>, PromptError> {
    let content = std::fs::read_to_string(prompt_path(dir, name)?)?;
    let (_, body) = split_frontmatter(&content);
    let pattern = Regex::new(PARAMETER_PATTERN)?;

    let unique: BTreeSet<String> = pattern
        .captures_iter(&body)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    Ok(unique.into_iter().collect())
}
