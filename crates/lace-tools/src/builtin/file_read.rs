//! The built-in file-read tool. Paths are resolved relative to a fixed
//! workspace root and checked for containment the same way the teacher's
//! file tools did, minus write/move/delete (out of scope for the demo
//! tool set — see DESIGN.md).

use std::path::{Component, Path, PathBuf};

use serde_json::{json, Map, Value};

use lace_types::tool::{ToolAnnotations, ToolDefinition};

use crate::tool::Tool;

/// Resolve `requested` against `workspace_root`, rejecting absolute paths,
/// raw `..` components, and any path that escapes the root once resolved.
pub fn validate_path(workspace_root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);

    if requested_path.is_absolute() {
        return Err(format!("path '{requested}' must be relative to the workspace root"));
    }

    if requested_path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(format!("path '{requested}' may not contain '..' components"));
    }

    let root = workspace_root
        .canonicalize()
        .map_err(|e| format!("failed to canonicalize workspace root: {e}"))?;

    let candidate = root.join(requested_path);

    // The file may not exist yet; canonicalize the nearest existing ancestor
    // and rebuild the remainder, so containment is still checked against the
    // real (symlink-resolved) filesystem location.
    let mut existing_ancestor = candidate.as_path();
    let mut remainder = Vec::new();
    loop {
        match existing_ancestor.canonicalize() {
            Ok(resolved) => {
                let mut full = resolved;
                for part in remainder.into_iter().rev() {
                    full.push(part);
                }
                if !full.starts_with(&root) {
                    return Err(format!("path '{requested}' escapes the workspace root"));
                }
                return Ok(full);
            }
            Err(_) => {
                let Some(parent) = existing_ancestor.parent() else {
                    return Err(format!("path '{requested}' escapes the workspace root"));
                };
                if let Some(name) = existing_ancestor.file_name() {
                    remainder.push(name.to_os_string());
                }
                existing_ancestor = parent;
            }
        }
    }
}

pub struct FileReadTool {
    pub workspace_root: PathBuf,
}

impl FileReadTool {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FileReadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_read".into(),
            description: "Read a text file within the workspace, optionally by line range.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "path relative to the workspace root" },
                    "offset": { "type": "integer", "minimum": 0, "description": "first line to return, 0-based" },
                    "limit": { "type": "integer", "minimum": 1, "description": "maximum number of lines to return" }
                },
                "required": ["path"]
            }),
            annotations: ToolAnnotations {
                read_only_hint: Some(true),
                destructive_hint: Some(false),
                idempotent_hint: Some(true),
            },
        }
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String, String> {
        let requested = arguments
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing required field 'path'".to_string())?;

        let resolved = validate_path(&self.workspace_root, requested)?;

        let contents = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("failed to read '{requested}': {e}"))?;

        let offset = arguments.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = arguments.get("limit").and_then(Value::as_u64).map(|n| n as usize);

        let mut lines = contents.lines().skip(offset);
        let selected: Vec<&str> = match limit {
            Some(limit) => lines.by_ref().take(limit).collect(),
            None => lines.by_ref().collect(),
        };

        Ok(selected.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_absolute_paths() {
        let dir = tempdir().unwrap();
        let err = validate_path(dir.path(), "/etc/passwd").unwrap_err();
        assert!(err.contains("relative"));
    }

    #[test]
    fn rejects_parent_dir_components() {
        let dir = tempdir().unwrap();
        let err = validate_path(dir.path(), "../outside.txt").unwrap_err();
        assert!(err.contains(".."));
    }

    #[test]
    fn accepts_nested_relative_path() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let resolved = validate_path(dir.path(), "sub/file.txt").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[tokio::test]
    async fn reads_file_contents() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "line1\nline2\nline3\n").unwrap();
        let tool = FileReadTool::new(dir.path());
        let mut args = Map::new();
        args.insert("path".into(), json!("hello.txt"));
        let out = tool.call(args).await.unwrap();
        assert_eq!(out, "line1\nline2\nline3");
    }

    #[tokio::test]
    async fn respects_offset_and_limit() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "line1\nline2\nline3\n").unwrap();
        let tool = FileReadTool::new(dir.path());
        let mut args = Map::new();
        args.insert("path".into(), json!("hello.txt"));
        args.insert("offset".into(), json!(1));
        args.insert("limit".into(), json!(1));
        let out = tool.call(args).await.unwrap();
        assert_eq!(out, "line2");
    }

    #[tokio::test]
    async fn escaping_path_is_rejected() {
        let dir = tempdir().unwrap();
        let tool = FileReadTool::new(dir.path());
        let mut args = Map::new();
        args.insert("path".into(), json!("../../../../etc/passwd"));
        assert!(tool.call(args).await.is_err());
    }
}
