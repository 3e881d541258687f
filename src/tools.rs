use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use schemars::{JsonSchema, schema_for};

mod edit_file;
mod list_files;
mod read_file;

type ToolResult = Result<String, Box<dyn std::error::Error + Send + Sync>>;

type ToolHandler =
    fn(Arc<Workspace>, serde_json::Value) -> Pin<Box<dyn Future<Output = ToolResult> + Send>>;

pub(crate) struct ToolDefinition {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) input_schema: serde_json::Value,
    pub(crate) handler: ToolHandler,
}

pub(crate) fn get_all_tools() -> Vec<ToolDefinition> {
    vec![
        read_file::definition(),
        list_files::definition(),
        edit_file::definition(),
    ]
}

fn input_schema<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// The directory tools may touch. Paths from the model are resolved inside it.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path inside the root, following symlinks: the
    /// deepest existing ancestor must canonicalize to somewhere under the
    /// canonical root.
    pub(crate) async fn resolve(&self, relative: &str) -> Result<PathBuf, String> {
        let outside = || format!("path {relative:?} is outside the workspace");
        let lexical = self.resolve_lexical(relative)?;
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|err| format!("workspace root {}: {err}", self.root.display()))?;

        let mut existing = lexical.as_path();
        loop {
            match tokio::fs::canonicalize(existing).await {
                Ok(real) if real.starts_with(&root) => return Ok(lexical),
                Ok(_) => return Err(outside()),
                // A dangling symlink could later be created through.
                Err(_) if tokio::fs::symlink_metadata(existing).await.is_ok() => {
                    return Err(outside());
                }
                Err(_) => match existing.parent() {
                    Some(parent) => existing = parent,
                    None => return Err(outside()),
                },
            }
        }
    }

    /// Refuse absolute paths and `..` escapes without touching the filesystem.
    fn resolve_lexical(&self, relative: &str) -> Result<PathBuf, String> {
        let mut resolved = self.root.clone();
        let mut depth = 0usize;

        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir if depth > 0 => {
                    resolved.pop();
                    depth -= 1;
                }
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(format!("path {relative:?} is outside the workspace"));
                }
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_lexical_stays_inside_root() {
        let workspace = Workspace::new("/sandbox");
        assert_eq!(
            workspace.resolve_lexical("src/./main.rs").unwrap(),
            PathBuf::from("/sandbox/src/main.rs")
        );
        assert_eq!(
            workspace.resolve_lexical("src/../Cargo.toml").unwrap(),
            PathBuf::from("/sandbox/Cargo.toml")
        );
        assert_eq!(workspace.resolve_lexical("").unwrap(), PathBuf::from("/sandbox"));
        assert!(workspace.resolve_lexical("../etc/passwd").is_err());
        assert!(workspace.resolve_lexical("/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn resolve_allows_paths_that_do_not_exist_yet() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path());
        assert_eq!(
            workspace.resolve("new/dir/file.txt").await.unwrap(),
            dir.path().join("new/dir/file.txt")
        );
        assert!(workspace.resolve("../outside.txt").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_rejects_symlinks_leaving_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("missing"),
            dir.path().join("dangling"),
        )
        .unwrap();
        std::os::unix::fs::symlink(dir.path().join("sub"), dir.path().join("inner")).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let workspace = Workspace::new(dir.path());
        let err = workspace.resolve("escape/secret.txt").await.unwrap_err();
        assert!(err.contains("outside the workspace"), "{err}");
        assert!(workspace.resolve("dangling").await.is_err());
        assert!(workspace.resolve("inner/file.txt").await.is_ok());
    }

    #[test]
    fn every_tool_has_an_object_schema() {
        for tool in get_all_tools() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            assert!(!tool.description.is_empty());
        }
    }
}
