use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolDefinition, ToolResult, Workspace, input_schema};

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct ListFilesInput {
    #[schemars(description = "Optional path relative to the workspace root. Defaults to the root itself.")]
    #[serde(default)]
    path: String,
}

async fn list_files_impl(workspace: Arc<Workspace>, input: serde_json::Value) -> ToolResult {
    let input: ListFilesInput = serde_json::from_value(input)?;
    let dir = workspace.resolve(&input.path).await?;

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type().await?.is_dir() {
            files.push(format!("{}/", name));
        } else {
            files.push(name);
        }
    }

    files.sort();
    Ok(serde_json::to_string(&files)?)
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "list_files",
        description: "List files and directories at a path in the workspace. Directories end with '/'. Without a path, lists the workspace root.",
        input_schema: input_schema::<ListFilesInput>(),
        handler: |workspace, input| Box::pin(list_files_impl(workspace, input)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn lists_sorted_entries_with_dir_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let workspace = Arc::new(Workspace::new(dir.path()));

        let out = list_files_impl(workspace, json!({})).await.unwrap();
        assert_eq!(out, r#"["a/","b.txt"]"#);
    }
}
