use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub(crate) struct ConverseResponse {
    pub(crate) output: Option<ConverseOutput>,
    #[serde(rename = "stopReason", default)]
    pub(crate) stop_reason: Option<String>,
    #[serde(default)]
    pub(crate) usage: Option<ConverseUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConverseOutput {
    pub(crate) message: Option<ConverseMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConverseMessage {
    #[serde(default)]
    pub(crate) role: Option<String>,
    #[serde(default)]
    pub(crate) content: Vec<ConverseContentBlock>,
}

/// Response content block. Only text and tool use are surfaced; other blocks
/// (reasoning, citations) deserialize with every field empty.
#[derive(Debug, Deserialize)]
pub(crate) struct ConverseContentBlock {
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(rename = "toolUse", default)]
    pub(crate) tool_use: Option<ConverseToolUse>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConverseToolUse {
    #[serde(rename = "toolUseId")]
    pub(crate) tool_use_id: String,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) input: Value,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub(crate) struct ConverseUsage {
    #[serde(rename = "inputTokens", default)]
    pub(crate) input_tokens: u64,
    #[serde(rename = "outputTokens", default)]
    pub(crate) output_tokens: u64,
    #[serde(rename = "totalTokens", default)]
    pub(crate) total_tokens: u64,
}

/// `messageStart` event.
#[derive(Debug, Deserialize)]
pub(crate) struct MessageStartEvent {
    #[serde(default)]
    pub(crate) role: Option<String>,
}

/// `contentBlockStart` event.
#[derive(Debug, Deserialize)]
pub(crate) struct ContentBlockStartEvent {
    #[serde(rename = "contentBlockIndex", default)]
    pub(crate) content_block_index: usize,
    #[serde(default)]
    pub(crate) start: Option<ContentBlockStart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentBlockStart {
    #[serde(rename = "toolUse", default)]
    pub(crate) tool_use: Option<ToolUseStart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolUseStart {
    #[serde(rename = "toolUseId")]
    pub(crate) tool_use_id: String,
    pub(crate) name: String,
}

/// `contentBlockDelta` event.
#[derive(Debug, Deserialize)]
pub(crate) struct ContentBlockDeltaEvent {
    #[serde(rename = "contentBlockIndex", default)]
    pub(crate) content_block_index: usize,
    #[serde(default)]
    pub(crate) delta: Option<ContentBlockDelta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentBlockDelta {
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(rename = "toolUse", default)]
    pub(crate) tool_use: Option<ToolUseDelta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolUseDelta {
    #[serde(default)]
    pub(crate) input: String,
}

/// `messageStop` event.
#[derive(Debug, Deserialize)]
pub(crate) struct MessageStopEvent {
    #[serde(rename = "stopReason", default)]
    pub(crate) stop_reason: Option<String>,
}

/// `metadata` event.
#[derive(Debug, Deserialize)]
pub(crate) struct MetadataEvent {
    #[serde(default)]
    pub(crate) usage: Option<ConverseUsage>,
}

/// Error body: `{"message": "..."}`, sometimes `Message`.
#[derive(Debug, Deserialize)]
pub(crate) struct BedrockErrorBody {
    #[serde(alias = "Message", default)]
    pub(crate) message: Option<String>,
}
