//! Converse-style chat abstraction with tool calling.
//!
//! Models either answer in text or request execution of declared tools; the
//! caller runs the tools and feeds structured results back until the model
//! signals completion. One production implementation (Anthropic Messages API)
//! and one mock with queued turns.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when interacting with a model provider.
#[derive(Debug, Error)]
pub enum ModelError {
    /// An HTTP-level error (connection failure, DNS, TLS, etc.).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The API returned a non-success status with a message.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse the API response body.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The API indicated rate limiting (HTTP 429).
    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ModelError::Timeout
        } else {
            ModelError::HttpError(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Core data types
// ---------------------------------------------------------------------------

/// Role of a message participant. System instructions travel out-of-band in
/// [`ChatConfig::system_prompt`], not as a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Encoding of an image embedded in a user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    /// Infer the format from an object key's extension, defaulting to JPEG.
    pub fn from_key(key: &str) -> Self {
        match key.rsplit('.').next().map(|e| e.to_ascii_lowercase()) {
            Some(ext) if ext == "png" => ImageFormat::Png,
            Some(ext) if ext == "gif" => ImageFormat::Gif,
            Some(ext) if ext == "webp" => ImageFormat::Webp,
            _ => ImageFormat::Jpeg,
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// One block of content within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { format: ImageFormat, data: Vec<u8> },
    ToolUse(ToolUse),
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
    },
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Wrap executed tool results into the user turn the protocol expects.
    pub fn tool_results(results: Vec<(String, serde_json::Value)>) -> Self {
        Self {
            role: Role::User,
            content: results
                .into_iter()
                .map(|(tool_use_id, content)| ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                })
                .collect(),
        }
    }

    /// All tool invocations requested in this message.
    pub fn tool_uses(&self) -> Vec<&ToolUse> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse(tool_use) => Some(tool_use),
                _ => None,
            })
            .collect()
    }

    /// Concatenated text blocks, for logging.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Definition of a tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input object.
    pub input_schema: serde_json::Value,
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl StopReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// Configuration for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            system_prompt: None,
        }
    }
}

/// One model turn: the assistant message plus the stop reason that ended it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    pub message: ChatMessage,
    pub stop_reason: StopReason,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ModelTurn {
    /// Convenience constructor for a plain-text completion turn.
    pub fn end_turn(text: impl Into<String>) -> Self {
        Self {
            message: ChatMessage::assistant(vec![ContentBlock::Text { text: text.into() }]),
            stop_reason: StopReason::EndTurn,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Convenience constructor for a turn requesting one tool call.
    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            message: ChatMessage::assistant(vec![ContentBlock::ToolUse(ToolUse {
                id: id.into(),
                name: name.into(),
                input,
            })]),
            stop_reason: StopReason::ToolUse,
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// ChatModel trait
// ---------------------------------------------------------------------------

/// Async trait for converse-style chat providers.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the conversation (with declared tools) and return the model's
    /// next turn.
    async fn converse(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        config: &ChatConfig,
    ) -> Result<ModelTurn, ModelError>;
}

// ---------------------------------------------------------------------------
// AnthropicChatModel
// ---------------------------------------------------------------------------

/// Chat provider for the Anthropic Messages API.
pub struct AnthropicChatModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicChatModel {
    /// Create a new provider. `api_key` is sent as the `x-api-key` header.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    /// Override the base URL (useful for testing with a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the JSON request body for the Messages API.
    pub fn build_request_body(
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        config: &ChatConfig,
    ) -> serde_json::Value {
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|msg| {
                let blocks: Vec<serde_json::Value> =
                    msg.content.iter().map(Self::encode_block).collect();
                serde_json::json!({
                    "role": msg.role.to_string(),
                    "content": blocks,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": api_messages,
        });

        if let Some(ref system) = config.system_prompt {
            body["system"] = serde_json::Value::String(system.clone());
        }

        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools
                .iter()
                .map(|t| serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                }))
                .collect::<Vec<_>>());
        }

        body
    }

    fn encode_block(block: &ContentBlock) -> serde_json::Value {
        match block {
            ContentBlock::Text { text } => serde_json::json!({
                "type": "text",
                "text": text,
            }),
            ContentBlock::Image { format, data } => serde_json::json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": format.media_type(),
                    "data": base64::engine::general_purpose::STANDARD.encode(data),
                },
            }),
            ContentBlock::ToolUse(tool_use) => serde_json::json!({
                "type": "tool_use",
                "id": tool_use.id,
                "name": tool_use.name,
                "input": tool_use.input,
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => serde_json::json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": [{ "type": "text", "text": content.to_string() }],
            }),
        }
    }
}

/// Deserialize helpers for the Messages API response.
#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl ChatModel for AnthropicChatModel {
    async fn converse(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        config: &ChatConfig,
    ) -> Result<ModelTurn, ModelError> {
        let body = Self::build_request_body(messages, tools, config);
        let url = format!("{}/v1/messages", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();

        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(ModelError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::ApiError {
                status,
                message: text,
            });
        }

        let api_resp: AnthropicResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::ParseError(e.to_string()))?;

        let mut content = Vec::with_capacity(api_resp.content.len());
        for block in api_resp.content {
            match block.kind.as_str() {
                "text" => content.push(ContentBlock::Text {
                    text: block.text.unwrap_or_default(),
                }),
                "tool_use" => {
                    let (id, name) = match (block.id, block.name) {
                        (Some(id), Some(name)) => (id, name),
                        _ => {
                            return Err(ModelError::ParseError(
                                "tool_use block missing id or name".to_string(),
                            ))
                        }
                    };
                    content.push(ContentBlock::ToolUse(ToolUse {
                        id,
                        name,
                        input: block.input.unwrap_or(serde_json::Value::Null),
                    }));
                }
                // Unknown block kinds are skipped rather than failing the turn.
                _ => {}
            }
        }

        Ok(ModelTurn {
            message: ChatMessage::assistant(content),
            stop_reason: api_resp
                .stop_reason
                .as_deref()
                .map(StopReason::parse)
                .unwrap_or(StopReason::EndTurn),
            input_tokens: api_resp.usage.input_tokens,
            output_tokens: api_resp.usage.output_tokens,
        })
    }
}

// ---------------------------------------------------------------------------
// MockChatModel
// ---------------------------------------------------------------------------

/// A mock chat model for testing.
///
/// Returns pre-queued turns in order; once the queue is empty, returns a
/// default end-turn response. Captures every request for assertions.
pub struct MockChatModel {
    turns: Arc<Mutex<VecDeque<Result<ModelTurn, ModelError>>>>,
    #[allow(clippy::type_complexity)]
    captured: Arc<Mutex<Vec<(Vec<ChatMessage>, Vec<ToolSpec>)>>>,
}

impl MockChatModel {
    pub fn new() -> Self {
        Self {
            turns: Arc::new(Mutex::new(VecDeque::new())),
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a successful turn.
    pub fn with_turn(self, turn: ModelTurn) -> Self {
        self.turns.lock().unwrap().push_back(Ok(turn));
        self
    }

    /// Queue an error.
    pub fn with_error(self, error: ModelError) -> Self {
        self.turns.lock().unwrap().push_back(Err(error));
        self
    }

    /// Get captured requests for assertions.
    pub fn captured_requests(&self) -> Vec<(Vec<ChatMessage>, Vec<ToolSpec>)> {
        self.captured.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.captured.lock().unwrap().len()
    }
}

impl Default for MockChatModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn converse(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        _config: &ChatConfig,
    ) -> Result<ModelTurn, ModelError> {
        self.captured
            .lock()
            .unwrap()
            .push((messages.to_vec(), tools.to_vec()));

        match self.turns.lock().unwrap().pop_front() {
            Some(turn) => turn,
            None => Ok(ModelTurn::end_turn("Mock response")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
