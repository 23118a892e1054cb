//! Tool system for the agent.
//!
//! Tools are local capabilities a model can request by name. A
//! [`ToolRegistry`] is built once by the composition root; each agent is
//! bound to a [`ToolSet`], the subset of registered tools it may call.
//!
//! ## Working-directory confinement
//!
//! When the execution context carries a `workingdir` setting, filesystem
//! tools resolve every path against it and answer `Access denied: ...` for
//! anything that lands outside. This is advisory, not a sandbox.
//!
//! ## Failure convention
//!
//! Expected failures (missing file, bad path, invalid pattern) come back as
//! `Ok` strings the model can read. Missing or mistyped arguments are raised
//! as [`InvalidArguments`], which the agent loop also turns into a tool
//! message. Any other `Err` is unexpected and aborts the turn.

mod context;
mod file_ops;
mod search;
mod task_tools;
mod terminal;
mod web;

pub use context::ToolExecutionContext;
pub use file_ops::{DeleteFile, ReadFile, ReplaceInFile, WriteFile};
pub use search::{FileSearch, GrepSearch};
pub use task_tools::{AddSubtask, CreateTask, UpdateTaskStatus};
pub use terminal::RunCommand;
pub use web::{WebFetch, WebSearch};

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::{AnthropicToolDefinition, FunctionDefinition, ToolDefinition, ToolsFormat};

// ============================================================================
// Path Confinement
// ============================================================================

/// Collapse `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest,
/// so symlinks are followed even for files that do not exist yet.
fn resolve_through_existing(path: &Path) -> PathBuf {
    let normalized = normalize_lexically(path);
    let mut existing = normalized.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut resolved = canonical;
            for part in rest.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return normalized,
        }
    }
}

/// Resolve `path_str` for a tool call, honoring the `workingdir` setting.
///
/// Relative paths resolve against `workingdir` (or the process directory
/// when unset). With `workingdir` set, a result outside it is rejected.
///
/// # Errors
/// A human-readable `Access denied: ...` string suitable as a tool result.
pub fn validate_path(ctx: &ToolExecutionContext, path_str: &str) -> Result<PathBuf, String> {
    let path = Path::new(path_str);
    let Some(root) = ctx.working_dir() else {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| format!("Error resolving path: {}", e))?
                .join(path)
        };
        return Ok(resolve_through_existing(&absolute));
    };

    let root_resolved = resolve_through_existing(&root);
    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root_resolved.join(path)
    };
    let resolved = resolve_through_existing(&candidate);

    if !resolved.starts_with(&root_resolved) {
        return Err(format!(
            "Access denied: {} is outside the allowed working directory {}",
            path_str,
            root.display()
        ));
    }
    Ok(resolved)
}

/// Root for tree-walking tools: `workingdir` if set, else the process directory.
pub(crate) fn search_root(ctx: &ToolExecutionContext) -> Result<PathBuf, String> {
    match ctx.working_dir() {
        Some(root) => Ok(resolve_through_existing(&root)),
        None => std::env::current_dir()
            .map_err(|e| format!("Error resolving working directory: {}", e)),
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// Raised by a tool when the model supplied unusable arguments.
#[derive(Debug, Error)]
#[error("Error: {0}")]
pub struct InvalidArguments(pub String);

/// Fetch a required string argument.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args[key]
        .as_str()
        .ok_or_else(|| InvalidArguments(format!("Missing '{}' argument", key)).into())
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args[key].as_str().filter(|s| !s.is_empty())
}

/// Information about a tool for display purposes.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// A capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name; also the key the model calls it by.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> anyhow::Result<String>;
}

/// Project one tool into a vendor declaration.
pub fn tool_declaration(tool: &dyn Tool, format: ToolsFormat) -> Value {
    let declaration = match format {
        ToolsFormat::OpenAi => serde_json::to_value(ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            },
        }),
        ToolsFormat::Anthropic => serde_json::to_value(AnthropicToolDefinition {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.parameters_schema(),
        }),
    };
    // Serializing plain strings and a Value cannot fail
    declaration.unwrap_or_else(|_| json!({ "name": tool.name() }))
}

// ============================================================================
// Registry and bound subsets
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Tool '{0}' is already registered")]
    Duplicate(String),
}

/// Every tool known to the process, keyed by unique name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding all built-in tools.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register_builtin_tools();
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        tracing::debug!("Registered tool {}", name);
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    fn register_builtin_tools(&mut self) {
        let builtins: Vec<Arc<dyn Tool>> = vec![
            // Filesystem
            Arc::new(file_ops::ReadFile),
            Arc::new(file_ops::WriteFile),
            Arc::new(file_ops::ReplaceInFile),
            Arc::new(file_ops::DeleteFile),
            Arc::new(search::FileSearch),
            Arc::new(search::GrepSearch),
            // Terminal
            Arc::new(terminal::RunCommand),
            // Web
            Arc::new(web::WebSearch),
            Arc::new(web::WebFetch),
            // Task management
            Arc::new(task_tools::CreateTask),
            Arc::new(task_tools::AddSubtask),
            Arc::new(task_tools::UpdateTaskStatus),
        ];
        for tool in builtins {
            if let Err(e) = self.register(tool) {
                tracing::warn!("Skipping built-in tool: {}", e);
            }
        }
        tracing::info!("Tool registry ready with {} tools", self.tools.len());
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Bind the named tools, in the order given. Unknown names are skipped.
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> ToolSet {
        let mut tools = Vec::new();
        for name in names {
            match self.get(name.as_ref()) {
                Some(tool) => {
                    if !tools.iter().any(|t: &Arc<dyn Tool>| t.name() == name.as_ref()) {
                        tools.push(tool);
                    }
                }
                None => tracing::warn!("Tool '{}' not found in registry", name.as_ref()),
            }
        }
        ToolSet { tools }
    }

    /// Bind every registered tool.
    pub fn all(&self) -> ToolSet {
        ToolSet {
            tools: self.tools.clone(),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// The tools one agent is allowed to call.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for every bound tool in `format`.
    pub fn declarations(&self, format: ToolsFormat) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| tool_declaration(t.as_ref(), format))
            .collect()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.iter().map(|t| t.name())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn confined(root: &Path) -> ToolExecutionContext {
        let mut settings = HashMap::new();
        settings.insert("workingdir".to_string(), root.display().to_string());
        ToolExecutionContext::new(settings)
    }

    #[test]
    fn paths_inside_root_resolve() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = confined(dir.path());
        let resolved = validate_path(&ctx, "sub/new.txt").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
        assert!(resolved.ends_with("sub/new.txt"));
        assert!(validate_path(&ctx, "a/../b.txt").is_ok());
    }

    #[test]
    fn escaping_paths_are_denied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = confined(dir.path());
        for path in ["../outside.txt", "sub/../../x", "/etc/passwd"] {
            let err = validate_path(&ctx, path).unwrap_err();
            assert!(err.starts_with("Access denied"), "{}: {}", path, err);
        }
    }

    #[test]
    fn sibling_with_shared_prefix_is_denied() {
        let parent = tempfile::tempdir().expect("tempdir");
        let root = parent.path().join("work");
        std::fs::create_dir(&root).unwrap();
        std::fs::create_dir(parent.path().join("workshop")).unwrap();
        let ctx = confined(&root);
        assert!(validate_path(&ctx, "../workshop/file").is_err());
    }

    #[test]
    fn unconfined_context_allows_any_path() {
        let ctx = ToolExecutionContext::default();
        assert!(validate_path(&ctx, "/tmp/anything").is_ok());
    }

    #[test]
    fn registry_rejects_duplicates_and_subsets_in_order() {
        let mut registry = ToolRegistry::with_builtin_tools();
        assert!(registry.has_tool("filesys.read_file"));
        assert_eq!(
            registry.register(Arc::new(file_ops::ReadFile)),
            Err(RegistryError::Duplicate("filesys.read_file".into()))
        );

        let set = registry.subset(&["terminal.run_command", "nope", "filesys.read_file"]);
        assert_eq!(set.names(), vec!["terminal.run_command", "filesys.read_file"]);
        assert!(set.get("filesys.write_file").is_none());
    }

    #[test]
    fn declarations_follow_vendor_shape() {
        let registry = ToolRegistry::with_builtin_tools();
        let set = registry.subset(&["filesys.read_file"]);

        let openai = set.declarations(ToolsFormat::OpenAi);
        assert_eq!(openai[0]["type"], "function");
        assert_eq!(openai[0]["function"]["name"], "filesys.read_file");
        assert_eq!(openai[0]["function"]["parameters"]["type"], "object");

        let anthropic = set.declarations(ToolsFormat::Anthropic);
        assert_eq!(anthropic[0]["name"], "filesys.read_file");
        assert!(anthropic[0]["input_schema"]["properties"]["file_path"].is_object());
    }

    #[test]
    fn missing_argument_is_invalid_arguments() {
        let err = required_str(&json!({}), "file_path").unwrap_err();
        assert!(err.downcast_ref::<InvalidArguments>().is_some());
        assert_eq!(err.to_string(), "Error: Missing 'file_path' argument");
    }
}
