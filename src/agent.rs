use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::ai_sdk::{
    AssistantMessage, ContentBlock, MessageParam, MessageRequest, MessageResponse,
    ResponseContentBlock, ToolDefinitionApi, UserMessage, assistant_content_from_response,
};
use crate::emitter::Emitter;
use crate::handler::{HandlerResult, PromptHandler};
use crate::protocol::{Options, PromptContent};
use crate::tools::{ToolDefinition, Workspace, get_all_tools};

pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const MAX_TURNS: usize = 50;
const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

/// Per-request settings, read from the request `options`.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    model: String,
    max_tokens: u32,
    system: Option<String>,
}

impl Settings {
    fn from_options(default_model: &str, options: &Options) -> Self {
        Self {
            model: options
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(default_model)
                .to_string(),
            max_tokens: options
                .get("max_tokens")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(DEFAULT_MAX_TOKENS),
            system: options
                .get("system")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Runs the Anthropic tool loop against the sandbox workspace and reports
/// every step as a stream event.
pub struct Agent {
    client: Client,
    api_key: String,
    model: String,
    workspace: Arc<Workspace>,
    tools: Vec<ToolDefinition>,
}

impl Agent {
    pub fn new(api_key: String, workspace: Workspace) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            workspace: Arc::new(workspace),
            tools: get_all_tools(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn run_inference(
        &self,
        settings: &Settings,
        conversation: &[MessageParam],
    ) -> HandlerResult<MessageResponse> {
        let tools_api: Vec<ToolDefinitionApi> = self
            .tools
            .iter()
            .map(|t| ToolDefinitionApi {
                name: t.name.to_string(),
                description: t.description.to_string(),
                input_schema: t.input_schema.clone(),
            })
            .collect();

        let request = MessageRequest {
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            system: settings.system.clone(),
            messages: conversation.to_vec(),
            tools: tools_api,
        };

        tracing::debug!(model = %settings.model, messages = conversation.len(), "sending inference request");
        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(format!("API error: {} - {}", status, error_text).into());
        }

        let response: MessageResponse = response.json().await?;
        tracing::debug!(id = %response.id, stop_reason = %response.stop_reason, "inference complete");
        Ok(response)
    }

    async fn execute_tool(&self, id: String, name: &str, input: Value) -> ContentBlock {
        let tool_def = self.tools.iter().find(|t| t.name == name);

        match tool_def {
            Some(tool) => match (tool.handler)(Arc::clone(&self.workspace), input).await {
                Ok(result) => ContentBlock::tool_result(id, result, false),
                Err(e) => ContentBlock::tool_result(id, e.to_string(), true),
            },
            None => ContentBlock::tool_result(id, "tool not found".to_string(), true),
        }
    }
}

#[async_trait]
impl PromptHandler for Agent {
    async fn handle(
        &self,
        prompt: PromptContent,
        emitter: Emitter,
        options: Options,
    ) -> HandlerResult {
        let settings = Settings::from_options(&self.model, &options);
        let mut conversation = vec![MessageParam::User(UserMessage::from_prompt(&prompt))];

        for _ in 0..MAX_TURNS {
            if emitter.is_closed() {
                tracing::info!("client disconnected, abandoning tool loop");
                return Ok(());
            }

            let response = self.run_inference(&settings, &conversation).await?;
            let mut tool_results: Vec<ContentBlock> = Vec::new();

            for content in &response.content {
                match content {
                    ResponseContentBlock::Text { text } => emitter.text_chunk(text.clone()),
                    ResponseContentBlock::ToolUse { id, name, input } => {
                        emitter.tool_start(id.clone(), name.clone(), input.as_object().cloned());

                        let result = self.execute_tool(id.clone(), name, input.clone()).await;
                        if let ContentBlock::ToolResult { content, .. } = &result {
                            emitter.tool_done(id.clone(), content.clone());
                        }
                        tool_results.push(result);
                    }
                }
            }

            conversation.push(MessageParam::Assistant(AssistantMessage::new(
                assistant_content_from_response(&response),
            )));

            if tool_results.is_empty() {
                emitter.done();
                return Ok(());
            }
            conversation.push(MessageParam::User(UserMessage::new(tool_results)));
        }

        Err(format!("tool loop did not finish within {} turns", MAX_TURNS).into())
    }
}
