//! Wire format for the prompt endpoint.
//!
//! Every event is one JSON object terminated by `\n`. The `type` field is the
//! discriminator; key order is not part of the format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RequestError;

/// Free-form options forwarded verbatim to the prompt handler.
pub type Options = Map<String, Value>;

/// Events with a fixed shape. Extra keys make a line a [`CustomEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum StreamEvent {
    TextChunk {
        text: String,
    },
    ToolStart {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<Map<String, Value>>,
    },
    ToolDone {
        id: String,
        result: String,
    },
    Error {
        message: String,
    },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
}

/// Handler-defined event: a `type` plus arbitrary sibling fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl CustomEvent {
    /// A `type` key inside `fields` is discarded so the discriminator stays unique.
    pub fn new(kind: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        fields.remove("type");
        Self {
            kind: kind.into(),
            fields,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// Anything that can appear on a line of the stream.
///
/// Lines matching a built-in shape exactly decode to [`StreamEvent`];
/// anything else carrying a string `type`, including a built-in `type` with
/// extra keys, decodes to [`CustomEvent`] so no field is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Event {
    Stream(StreamEvent),
    Custom(CustomEvent),
}

impl Event {
    pub fn kind(&self) -> &str {
        match self {
            Event::Stream(StreamEvent::TextChunk { .. }) => "text_chunk",
            Event::Stream(StreamEvent::ToolStart { .. }) => "tool_start",
            Event::Stream(StreamEvent::ToolDone { .. }) => "tool_done",
            Event::Stream(StreamEvent::Error { .. }) => "error",
            Event::Stream(StreamEvent::Done { .. }) => "done",
            Event::Custom(custom) => custom.kind(),
        }
    }
}

impl From<StreamEvent> for Event {
    fn from(event: StreamEvent) -> Self {
        Event::Stream(event)
    }
}

impl From<CustomEvent> for Event {
    fn from(event: CustomEvent) -> Self {
        Event::Custom(event)
    }
}

/// Serialize one event as a single NDJSON line, newline included.
pub fn to_line(event: &Event) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

/// Parse a single line (with or without its trailing newline).
pub fn from_line(line: &str) -> Result<Event, serde_json::Error> {
    serde_json::from_str(line.trim_end_matches(['\r', '\n']))
}

/// The body of `POST /prompt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt: PromptContent,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Options,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<PromptContent>) -> Self {
        Self {
            prompt: prompt.into(),
            options: Options::new(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Validate a raw request body.
    ///
    /// Only the outer shape is checked: `prompt` must be a non-empty string or
    /// an array of content blocks, and `options`, when present, an object.
    pub fn from_body(body: &[u8]) -> Result<Self, RequestError> {
        let value: Value = serde_json::from_slice(body).map_err(RequestError::InvalidJson)?;

        let prompt = match value.get("prompt") {
            Some(Value::String(text)) if !text.is_empty() => PromptContent::Text(text.clone()),
            Some(blocks @ Value::Array(_)) => serde_json::from_value(blocks.clone())
                .map(PromptContent::Blocks)
                .map_err(|_| RequestError::InvalidPrompt)?,
            _ => return Err(RequestError::InvalidPrompt),
        };

        let options = match value.get("options") {
            None | Some(Value::Null) => Options::new(),
            Some(Value::Object(options)) => options.clone(),
            Some(_) => return Err(RequestError::InvalidOptions),
        };

        Ok(Self { prompt, options })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl PromptContent {
    /// Concatenated text of the prompt, ignoring binary attachments.
    pub fn text(&self) -> String {
        match self {
            PromptContent::Text(text) => text.clone(),
            PromptContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::File {
                        data: FileData::Text { text },
                        ..
                    } => Some(text.as_str()),
                    ContentBlock::File { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for PromptContent {
    fn from(text: String) -> Self {
        PromptContent::Text(text)
    }
}

impl From<&str> for PromptContent {
    fn from(text: &str) -> Self {
        PromptContent::Text(text.to_string())
    }
}

impl From<Vec<ContentBlock>> for PromptContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        PromptContent::Blocks(blocks)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    File {
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(flatten)]
        data: FileData,
    },
}

/// File payload: base64 `data` or inline `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileData {
    Base64 { data: String },
    Text { text: String },
}
