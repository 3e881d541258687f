use serde::{Deserialize, Serialize};

use crate::protocol::{self, FileData, PromptContent};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MessageRequest {
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) system: Option<String>,
    pub(crate) messages: Vec<MessageParam>,
    pub(crate) tools: Vec<ToolDefinitionApi>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageParam {
    User(UserMessage),
    Assistant(AssistantMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    role: String,
    content: Vec<ContentBlock>,
}

impl UserMessage {
    pub(crate) fn new(content: Vec<ContentBlock>) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }

    pub(crate) fn from_prompt(prompt: &PromptContent) -> Self {
        Self::new(user_content_from_prompt(prompt))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    role: String,
    content: Vec<ContentBlock>,
}

impl AssistantMessage {
    pub(crate) fn new(content: Vec<ContentBlock>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: Base64Source },
    Document { source: Base64Source },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Base64Source {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

impl Base64Source {
    fn new(media_type: &str, data: &str) -> Self {
        Self {
            kind: "base64".to_string(),
            media_type: media_type.to_string(),
            data: data.to_string(),
        }
    }
}

impl ContentBlock {
    pub(crate) fn tool_result(tool_use_id: String, content: String, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id,
            content,
            is_error: if is_error { Some(true) } else { None },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MessageResponse {
    pub(crate) id: String,
    pub(crate) content: Vec<ResponseContentBlock>,
    pub(crate) stop_reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseContentBlock {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ToolDefinitionApi {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) input_schema: serde_json::Value,
}

pub(crate) fn assistant_content_from_response(response: &MessageResponse) -> Vec<ContentBlock> {
    response
        .content
        .iter()
        .map(|content| match content {
            ResponseContentBlock::Text { text } => ContentBlock::Text { text: text.clone() },
            ResponseContentBlock::ToolUse { id, name, input } => ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
        })
        .collect()
}

/// Map relay prompt blocks onto what the Messages API accepts. Binary files
/// the API cannot take inline become a short text note.
pub(crate) fn user_content_from_prompt(prompt: &PromptContent) -> Vec<ContentBlock> {
    let blocks = match prompt {
        PromptContent::Text(text) => return vec![ContentBlock::Text { text: text.clone() }],
        PromptContent::Blocks(blocks) => blocks,
    };

    blocks
        .iter()
        .map(|block| match block {
            protocol::ContentBlock::Text { text } => ContentBlock::Text { text: text.clone() },
            protocol::ContentBlock::File {
                media_type,
                name,
                data,
            } => {
                let label = name.as_deref().unwrap_or("attachment");
                match data {
                    FileData::Text { text } => ContentBlock::Text {
                        text: format!("File {label} ({media_type}):\n{text}"),
                    },
                    FileData::Base64 { data } if media_type.starts_with("image/") => {
                        ContentBlock::Image {
                            source: Base64Source::new(media_type, data),
                        }
                    }
                    FileData::Base64 { data } if media_type == "application/pdf" => {
                        ContentBlock::Document {
                            source: Base64Source::new(media_type, data),
                        }
                    }
                    FileData::Base64 { .. } => ContentBlock::Text {
                        text: format!("[binary file {label} ({media_type}) omitted]"),
                    },
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_content_from_response_maps_blocks() {
        let response = MessageResponse {
            id: "msg_1".to_string(),
            stop_reason: "end".to_string(),
            content: vec![
                ResponseContentBlock::Text {
                    text: "hello".to_string(),
                },
                ResponseContentBlock::ToolUse {
                    id: "tool_1".to_string(),
                    name: "read_file".to_string(),
                    input: json!({"path": "README.md"}),
                },
            ],
        };

        let content = assistant_content_from_response(&response);
        assert_eq!(content.len(), 2);
        match &content[0] {
            ContentBlock::Text { text } => assert_eq!(text, "hello"),
            _ => panic!("expected text block"),
        }
        match &content[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "tool_1");
                assert_eq!(name, "read_file");
                assert_eq!(input, &json!({"path": "README.md"}));
            }
            _ => panic!("expected tool use block"),
        }
    }

    #[test]
    fn prompt_files_map_to_api_blocks() {
        let prompt: PromptContent = serde_json::from_value(json!([
            {"type": "text", "text": "look"},
            {"type": "file", "media_type": "image/png", "data": "AAAA"},
            {"type": "file", "media_type": "application/pdf", "name": "report.pdf", "data": "BBBB"},
            {"type": "file", "media_type": "text/csv", "name": "rows.csv", "text": "a,b"},
            {"type": "file", "media_type": "application/zip", "data": "CCCC"}
        ]))
        .unwrap();

        let blocks = user_content_from_prompt(&prompt);
        let wire = serde_json::to_value(&blocks).unwrap();
        assert_eq!(
            wire,
            json!([
                {"type": "text", "text": "look"},
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}},
                {"type": "document", "source": {"type": "base64", "media_type": "application/pdf", "data": "BBBB"}},
                {"type": "text", "text": "File rows.csv (text/csv):\na,b"},
                {"type": "text", "text": "[binary file attachment (application/zip) omitted]"}
            ])
        );
    }

    #[test]
    fn system_prompt_is_omitted_when_absent() {
        let request = MessageRequest {
            model: "m".to_string(),
            max_tokens: 16,
            system: None,
            messages: vec![MessageParam::User(UserMessage::from_prompt(&"hi".into()))],
            tools: Vec::new(),
        };
        let wire = serde_json::to_value(&request).unwrap();
        assert!(wire.get("system").is_none());
        assert_eq!(wire["messages"][0]["content"][0]["text"], json!("hi"));
    }
}
