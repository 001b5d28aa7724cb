use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{
    required_str, optional_str, ParameterKind, Tool, ToolCategory, ToolDefinition, ToolError,
    ToolParameter,
};

const ALLOWED_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "csv", "xml", "log", "html", "yaml", "toml", "png", "jpg", "jpeg",
];

/// Sandboxed read/write/list/delete confined to a configured root.
pub struct FileSystemTool {
    root: PathBuf,
    max_bytes: u64,
}

impl FileSystemTool {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root, max_bytes }
    }

    /// Resolve a caller path against the sandbox root.
    ///
    /// Normalization is lexical so write targets that do not exist yet are
    /// still confined; any traversal that would leave the root is refused.
    fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        let requested = Path::new(relative);
        let mut resolved = self.root.clone();
        let mut depth: usize = 0;

        for component in requested.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(ToolError::Sandbox(
                            "Path traversal detected; access denied".into(),
                        ));
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ToolError::Sandbox(
                        "Absolute paths are not allowed".into(),
                    ));
                }
            }
        }

        if !resolved.starts_with(&self.root) {
            return Err(ToolError::Sandbox(
                "Path traversal detected; access denied".into(),
            ));
        }
        Ok(resolved)
    }

    fn check_file_type(path: &Path) -> Result<(), ToolError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        match extension {
            Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
            _ => Err(ToolError::Validation("Disallowed file type".into())),
        }
    }

    async fn read(&self, target: &Path, relative: &str) -> Result<Value, ToolError> {
        let meta = tokio::fs::metadata(target)
            .await
            .map_err(|_| ToolError::Execution("File not found".into()))?;
        if !meta.is_file() {
            return Err(ToolError::Execution("File not found".into()));
        }
        Self::check_file_type(target)?;
        if meta.len() > self.max_bytes {
            return Err(ToolError::Validation("File too large".into()));
        }

        let content = tokio::fs::read_to_string(target)
            .await
            .map_err(ToolError::execution)?;
        Ok(json!({ "path": relative, "content": content }))
    }

    async fn write(
        &self,
        target: &Path,
        relative: &str,
        content: Option<&str>,
    ) -> Result<Value, ToolError> {
        let content =
            content.ok_or_else(|| ToolError::Validation("Missing content for write".into()))?;
        Self::check_file_type(target)?;
        if content.len() as u64 > self.max_bytes {
            return Err(ToolError::Validation("Content too large".into()));
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ToolError::execution)?;
        }
        tokio::fs::write(target, content)
            .await
            .map_err(ToolError::execution)?;
        Ok(json!({ "path": relative, "bytes": content.len() }))
    }

    async fn list(&self, target: &Path, relative: &str) -> Result<Value, ToolError> {
        let meta = tokio::fs::metadata(target)
            .await
            .map_err(|_| ToolError::Execution("Path not found".into()))?;

        if meta.is_file() {
            return Ok(json!({
                "type": "file",
                "path": relative,
                "size": meta.len(),
            }));
        }

        let mut entries = tokio::fs::read_dir(target)
            .await
            .map_err(ToolError::execution)?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(ToolError::execution)? {
            let entry_meta = entry.metadata().await.map_err(ToolError::execution)?;
            items.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": entry_meta.is_dir(),
                "size": entry_meta.is_file().then(|| entry_meta.len()),
            }));
        }
        Ok(json!({ "type": "dir", "path": relative, "items": items }))
    }

    async fn delete(&self, target: &Path, relative: &str) -> Result<Value, ToolError> {
        let meta = tokio::fs::metadata(target)
            .await
            .map_err(|_| ToolError::Execution("File not found".into()))?;
        if meta.is_dir() {
            return Err(ToolError::Sandbox(
                "Refusing to delete directories".into(),
            ));
        }
        tokio::fs::remove_file(target)
            .await
            .map_err(ToolError::execution)?;
        Ok(json!({ "deleted": relative }))
    }
}

#[async_trait]
impl Tool for FileSystemTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "file_operations",
            "Sandboxed file operations within the workspace (read/write/list/delete)",
            ToolCategory::Filesystem,
        )
        .with_parameters([
            ToolParameter::new("op", ParameterKind::String)
                .description("Operation: read|write|list|delete")
                .one_of([json!("read"), json!("write"), json!("list"), json!("delete")]),
            ToolParameter::new("path", ParameterKind::String)
                .description("Relative file or directory path under the sandbox root"),
            ToolParameter::new("content", ParameterKind::String)
                .description("Content to write (when op=write)")
                .optional(),
        ])
        .with_returns(json!({ "result": "Operation result (content, listing, or confirmation)" }))
    }

    async fn run(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let op = required_str(args, "op")?;
        let relative = required_str(args, "path")?;
        let target = self.resolve(relative)?;

        match op {
            "read" => self.read(&target, relative).await,
            "write" => self.write(&target, relative, optional_str(args, "content")).await,
            "list" => self.list(&target, relative).await,
            "delete" => self.delete(&target, relative).await,
            other => Err(ToolError::Validation(format!("Unknown operation: {other}"))),
        }
    }
}
