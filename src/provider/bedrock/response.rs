use crate::error::LLMError;
use crate::schema::{BackendMessage, BackendRole, BackendToolCall, ResponseMeta, TokenUsage};

use super::types::{ConverseResponse, ConverseUsage};

/// Normalizes a Converse `stopReason` to the OpenAI vocabulary. Unknown reasons pass through.
pub(crate) fn normalize_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        "content_filtered" | "guardrail_intervened" => "content_filter",
        other => other,
    }
    .to_string()
}

pub(crate) fn convert_usage(usage: ConverseUsage) -> TokenUsage {
    let total = if usage.total_tokens == 0 {
        usage.input_tokens + usage.output_tokens
    } else {
        usage.total_tokens
    };
    TokenUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: total,
    }
}

pub(crate) fn map_converse_response(response: ConverseResponse) -> Result<BackendMessage, LLMError> {
    let raw = response
        .output
        .and_then(|output| output.message)
        .ok_or_else(|| LLMError::BackendApi {
            provider: "bedrock",
            status: 200,
            code: None,
            kind: None,
            message: "response contained no output message".to_string(),
        })?;

    let role = match raw.role.as_deref() {
        None | Some("assistant") => BackendRole::Assistant,
        Some("user") => BackendRole::User,
        Some(other) => BackendRole::Other(other.to_string()),
    };
    let mut message = BackendMessage::new(role);
    let mut text = String::new();
    for block in raw.content {
        if let Some(chunk) = block.text {
            text.push_str(&chunk);
        }
        if let Some(tool_use) = block.tool_use {
            let arguments = match tool_use.input {
                serde_json::Value::Null => "{}".to_string(),
                input => input.to_string(),
            };
            message.tool_calls.push(BackendToolCall {
                index: Some(message.tool_calls.len()),
                id: tool_use.tool_use_id,
                kind: "function".to_string(),
                name: tool_use.name,
                arguments,
            });
        }
    }
    message.content = text;
    message.response_meta = Some(ResponseMeta {
        finish_reason: response
            .stop_reason
            .filter(|reason| !reason.is_empty())
            .map(|reason| normalize_stop_reason(&reason)),
        usage: response.usage.map(convert_usage),
    });
    Ok(message)
}
