//! Generative-model clients: a converse-style chat provider with tool
//! calling, an image-generation provider, and mock implementations for
//! testing without network access.

pub mod chat;
pub mod image;

pub use chat::{
    AnthropicChatModel, ChatConfig, ChatMessage, ChatModel, ContentBlock, ImageFormat,
    MockChatModel, ModelError, ModelTurn, Role, StopReason, ToolSpec, ToolUse,
};
pub use image::{ImageModel, MockImageModel, OpenAiImageModel};
