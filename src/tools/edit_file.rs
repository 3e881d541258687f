use std::io;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolDefinition, ToolResult, Workspace, input_schema};

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct EditFileInput {
    #[schemars(description = "The path of the file, relative to the workspace root")]
    path: String,
    #[schemars(description = "Text to search for. Must occur exactly once; empty to create a new file")]
    old_str: String,
    #[schemars(description = "Text to replace old_str with")]
    new_str: String,
}

async fn edit_file_impl(workspace: Arc<Workspace>, input: serde_json::Value) -> ToolResult {
    let input: EditFileInput = serde_json::from_value(input)?;

    if input.path.is_empty() || input.old_str == input.new_str {
        return Err("Invalid input parameters".into());
    }
    let path = workspace.resolve(&input.path).await?;

    match tokio::fs::read_to_string(&path).await {
        Ok(content) => {
            match content.matches(&input.old_str).count() {
                0 => return Err("old_str not found in file".into()),
                1 => {}
                n => return Err(format!("old_str matches {} times, expected exactly once", n).into()),
            }
            tokio::fs::write(&path, content.replacen(&input.old_str, &input.new_str, 1)).await?;
            Ok("OK".to_string())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound && input.old_str.is_empty() => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &input.new_str).await?;
            Ok(format!("Successfully created file {}", input.path))
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "edit_file",
        description: "Make edits to a text file in the workspace.\n\nReplaces 'old_str' with 'new_str' in the given file. 'old_str' must occur exactly once and differ from 'new_str'.\n\nIf the file does not exist and 'old_str' is empty, it is created with 'new_str' as its content.",
        input_schema: input_schema::<EditFileInput>(),
        handler: |workspace, input| Box::pin(edit_file_impl(workspace, input)),
    }
}
