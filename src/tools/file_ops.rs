//! File operation tools: read, write, replace, delete.
//!
//! Every path goes through [`validate_path`], so with a `workingdir` set
//! nothing outside it is read or touched.

use std::io::ErrorKind;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, validate_path, Tool, ToolExecutionContext};

/// Only UTF-8 is decoded; other encodings are reported back as unsupported.
fn check_encoding(args: &Value) -> Result<(), String> {
    match args["encoding"].as_str() {
        None => Ok(()),
        Some(enc) if matches!(enc.to_ascii_lowercase().as_str(), "utf-8" | "utf8") => Ok(()),
        Some(enc) => Err(format!("Error: Unsupported encoding {}", enc)),
    }
}

fn io_failure(action: &str, path: &str, err: &std::io::Error) -> String {
    if err.kind() == ErrorKind::PermissionDenied {
        format!("Error: Permission denied {} {}", action, path)
    } else {
        format!("Error {} {}: {}", action, path, err)
    }
}

/// Read the contents of a file.
pub struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "filesys.read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Operations are restricted to the working directory if set in context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to read"
                },
                "encoding": {
                    "type": "string",
                    "description": "File encoding (default: utf-8)"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let file_path = required_str(&args, "file_path")?;
        if let Err(msg) = check_encoding(&args) {
            return Ok(msg);
        }
        let path = match validate_path(ctx, file_path) {
            Ok(path) => path,
            Err(denied) => return Ok(denied),
        };

        tracing::info!("Reading file [{}]", file_path);
        if !path.exists() {
            return Ok(format!("Error: File {} does not exist", file_path));
        }
        if !path.is_file() {
            return Ok(format!("Error: {} is not a file", file_path));
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(io_failure("reading file", file_path, &e)),
        };
        Ok(String::from_utf8(bytes).unwrap_or_else(|_| {
            format!("Error: Could not decode file {} with encoding utf-8", file_path)
        }))
    }
}

/// Write content to a file (create or overwrite).
pub struct WriteFile;

#[async_trait]
impl Tool for WriteFile {
    fn name(&self) -> &str {
        "filesys.write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. Operations are restricted to the working directory if set in context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                },
                "encoding": {
                    "type": "string",
                    "description": "File encoding (default: utf-8)"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let file_path = required_str(&args, "file_path")?;
        let content = required_str(&args, "content")?;
        if let Err(msg) = check_encoding(&args) {
            return Ok(msg);
        }
        let path = match validate_path(ctx, file_path) {
            Ok(path) => path,
            Err(denied) => return Ok(denied),
        };

        tracing::info!("Writing file [{}]", file_path);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(io_failure("writing to file", file_path, &e));
            }
        }
        if let Err(e) = tokio::fs::write(&path, content).await {
            return Ok(io_failure("writing to file", file_path, &e));
        }

        Ok(format!(
            "Successfully wrote {} characters to {}",
            content.chars().count(),
            file_path
        ))
    }
}

/// Replace occurrences of a string in a file.
pub struct ReplaceInFile;

#[async_trait]
impl Tool for ReplaceInFile {
    fn name(&self) -> &str {
        "filesys.replace_in_file"
    }

    fn description(&self) -> &str {
        "Replace text in a file. Replaces all occurrences unless a count is given. Operations are restricted to the working directory if set in context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to modify"
                },
                "old_text": {
                    "type": "string",
                    "description": "Text to replace"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "encoding": {
                    "type": "string",
                    "description": "File encoding (default: utf-8)"
                },
                "count": {
                    "type": "integer",
                    "description": "Maximum number of replacements (-1 for all)",
                    "default": -1
                }
            },
            "required": ["file_path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let file_path = required_str(&args, "file_path")?;
        let old_text = required_str(&args, "old_text")?;
        let new_text = required_str(&args, "new_text")?;
        let count = args["count"].as_i64().unwrap_or(-1);
        if let Err(msg) = check_encoding(&args) {
            return Ok(msg);
        }
        let path = match validate_path(ctx, file_path) {
            Ok(path) => path,
            Err(denied) => return Ok(denied),
        };

        if !path.exists() {
            return Ok(format!("Error: File {} does not exist", file_path));
        }
        if !path.is_file() {
            return Ok(format!("Error: {} is not a file", file_path));
        }
        if old_text.is_empty() {
            return Ok("Error: old_text must not be empty".to_string());
        }

        let content = match tokio::fs::read(&path).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    return Ok(format!(
                        "Error: Could not decode file {} with encoding utf-8",
                        file_path
                    ))
                }
            },
            Err(e) => return Ok(io_failure("modifying file", file_path, &e)),
        };

        let found = content.matches(old_text).count();
        if found == 0 {
            return Ok(format!("Text '{}' not found in file {}", old_text, file_path));
        }

        let (updated, replacements) = if count < 0 {
            (content.replace(old_text, new_text), found)
        } else {
            let limit = count as usize;
            (content.replacen(old_text, new_text, limit), found.min(limit))
        };

        if let Err(e) = tokio::fs::write(&path, updated).await {
            return Ok(io_failure("modifying file", file_path, &e));
        }

        tracing::info!("Replaced {} occurrence(s) in [{}]", replacements, file_path);
        Ok(format!(
            "Successfully replaced {} occurrence(s) of '{}' with '{}' in {}",
            replacements, old_text, new_text, file_path
        ))
    }
}

/// Delete a single file.
pub struct DeleteFile;

#[async_trait]
impl Tool for DeleteFile {
    fn name(&self) -> &str {
        "filesys.delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file. Operations are restricted to the working directory if set in context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to delete"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let file_path = required_str(&args, "file_path")?;
        let path = match validate_path(ctx, file_path) {
            Ok(path) => path,
            Err(denied) => return Ok(denied),
        };

        if !path.exists() {
            return Ok(format!("Error: File {} does not exist", file_path));
        }
        if !path.is_file() {
            return Ok(format!(
                "Error: {} is not a file (use a directory deletion tool for directories)",
                file_path
            ));
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Deleted file [{}]", file_path);
                Ok(format!("Successfully deleted file {}", file_path))
            }
            Err(e) => Ok(io_failure("deleting file", file_path, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    fn ctx_for(root: &Path) -> ToolExecutionContext {
        let mut settings = HashMap::new();
        settings.insert("workingdir".to_string(), root.display().to_string());
        ToolExecutionContext::new(settings)
    }

    #[tokio::test]
    async fn write_then_read_inside_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for(dir.path());

        let out = WriteFile
            .execute(json!({"file_path": "notes/a.txt", "content": "hello"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, "Successfully wrote 5 characters to notes/a.txt");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes/a.txt")).unwrap(),
            "hello"
        );

        let read = ReadFile
            .execute(json!({"file_path": "notes/a.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read, "hello");
    }

    #[tokio::test]
    async fn escaping_write_is_denied_and_nothing_is_created() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("work");
        std::fs::create_dir(&root).unwrap();
        let ctx = ctx_for(&root);

        let out = WriteFile
            .execute(json!({"file_path": "../escape.txt", "content": "x"}), &ctx)
            .await
            .unwrap();
        assert!(out.starts_with("Access denied"), "{}", out);
        assert!(!parent.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn missing_file_is_a_string_result() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for(dir.path());
        let out = ReadFile
            .execute(json!({"file_path": "nope.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, "Error: File nope.txt does not exist");
    }

    #[tokio::test]
    async fn replace_respects_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "a a a").unwrap();
        let ctx = ctx_for(dir.path());

        let out = ReplaceInFile
            .execute(
                json!({"file_path": "f.txt", "old_text": "a", "new_text": "b", "count": 2}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.starts_with("Successfully replaced 2 occurrence(s)"));
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "b b a");

        ReplaceInFile
            .execute(json!({"file_path": "f.txt", "old_text": "a", "new_text": "b"}), &ctx)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "b b b");

        let none = ReplaceInFile
            .execute(json!({"file_path": "f.txt", "old_text": "zzz", "new_text": "y"}), &ctx)
            .await
            .unwrap();
        assert_eq!(none, "Text 'zzz' not found in file f.txt");
    }

    #[tokio::test]
    async fn delete_only_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("gone.txt"), "bye").unwrap();
        let ctx = ctx_for(dir.path());

        let out = DeleteFile
            .execute(json!({"file_path": "sub"}), &ctx)
            .await
            .unwrap();
        assert!(out.contains("is not a file"));

        let out = DeleteFile
            .execute(json!({"file_path": "gone.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, "Successfully deleted file gone.txt");
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[tokio::test]
    async fn unsupported_encoding_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for(dir.path());
        let out = ReadFile
            .execute(json!({"file_path": "a.txt", "encoding": "latin-1"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, "Error: Unsupported encoding latin-1");
    }
}
