use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolDefinition, ToolResult, Workspace, input_schema};

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct ReadFileInput {
    #[schemars(description = "The path of a file, relative to the workspace root.")]
    path: String,
}

async fn read_file_impl(workspace: Arc<Workspace>, input: serde_json::Value) -> ToolResult {
    let input: ReadFileInput = serde_json::from_value(input)?;
    let path = workspace.resolve(&input.path).await?;
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| format!("Error reading {}: {}", input.path, e).into())
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "read_file",
        description: "Read the contents of a file in the workspace. Do not use this with directory names.",
        input_schema: input_schema::<ReadFileInput>(),
        handler: |workspace, input| Box::pin(read_file_impl(workspace, input)),
    }
}
