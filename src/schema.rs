//! Backend-native message model.
//!
//! Every backend client speaks this shape. Translation to and from the canonical
//! OpenAI-compatible types lives in [`crate::translate`]; translation to a backend's own
//! wire format lives in that backend's `request`/`response` modules.

use serde_json::Value;

/// Role of a backend message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendRole {
    System,
    User,
    Assistant,
    Tool,
    Other(String),
}

/// One message exchanged with a backend, or one partial message on a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendMessage {
    pub role: BackendRole,
    /// Plain text. Ignored by backends when `parts` is non-empty.
    pub content: String,
    pub parts: Vec<BackendPart>,
    pub name: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_calls: Vec<BackendToolCall>,
    /// Set on responses and on the stream messages that carry a finish reason or usage.
    pub response_meta: Option<ResponseMeta>,
}

impl BackendMessage {
    pub fn new(role: BackendRole) -> Self {
        Self {
            role,
            content: String::new(),
            parts: Vec::new(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
            response_meta: None,
        }
    }

    pub fn text(role: BackendRole, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::new(role)
        }
    }

    /// Finish reason reported by the backend, if non-empty.
    pub fn finish_reason(&self) -> Option<&str> {
        self.response_meta
            .as_ref()
            .and_then(|meta| meta.finish_reason.as_deref())
            .filter(|reason| !reason.is_empty())
    }
}

/// Multimodal part of a backend message.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendPart {
    Text(String),
    Image(MediaSource),
    Audio(MediaSource),
    Video(MediaSource),
    File {
        source: MediaSource,
        name: String,
    },
}

/// Where media bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Remote reference passed through to the backend.
    Url {
        url: String,
        mime_type: Option<String>,
    },
    /// Base64 payload without a `data:` prefix.
    Inline { data: String, mime_type: String },
}

impl MediaSource {
    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Url { mime_type, .. } => mime_type.as_deref(),
            Self::Inline { mime_type, .. } => Some(mime_type),
        }
    }

    /// `data:` URL for inline sources, the original URL otherwise.
    pub fn to_url(&self) -> String {
        match self {
            Self::Url { url, .. } => url.clone(),
            Self::Inline { data, mime_type } => format!("data:{mime_type};base64,{data}"),
        }
    }
}

/// Tool call as the backend reports it. `kind` is the raw type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendToolCall {
    pub index: Option<usize>,
    pub id: String,
    pub kind: String,
    pub name: String,
    pub arguments: String,
}

/// Finish reason and token accounting attached to a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    /// Already normalised to the canonical vocabulary by the backend client.
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Tool definition bound to a backend client.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    pub description: Option<String>,
    /// JSON Schema of the arguments object.
    pub parameters: Option<Value>,
}

/// Generation parameters forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
}
