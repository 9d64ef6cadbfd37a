use crate::error::LLMError;
use crate::schema::{BackendMessage, BackendRole, BackendToolCall, ResponseMeta, TokenUsage};

use super::types::{OpenAiChatResponse, OpenAiToolCall, OpenAiUsage};

pub(crate) fn parse_role(role: Option<&str>) -> BackendRole {
    match role {
        None | Some("assistant") => BackendRole::Assistant,
        Some("system") => BackendRole::System,
        Some("user") => BackendRole::User,
        Some("tool") => BackendRole::Tool,
        Some(other) => BackendRole::Other(other.to_string()),
    }
}

pub(crate) fn convert_usage(usage: OpenAiUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

pub(crate) fn convert_tool_call(call: OpenAiToolCall) -> BackendToolCall {
    let (name, arguments) = call
        .function
        .map(|function| {
            (
                function.name.unwrap_or_default(),
                function.arguments.unwrap_or_default(),
            )
        })
        .unwrap_or_default();
    BackendToolCall {
        index: call.index,
        id: call.id.unwrap_or_default(),
        kind: call.kind.unwrap_or_default(),
        name,
        arguments,
    }
}

/// Converts the first choice of a completion into a backend message.
pub(crate) fn map_response(
    response: OpenAiChatResponse,
    provider: &'static str,
) -> Result<BackendMessage, LLMError> {
    let usage = response.usage.map(convert_usage);
    let choice = response
        .choices
        .into_iter()
        .min_by_key(|choice| choice.index)
        .ok_or_else(|| LLMError::BackendApi {
            provider,
            status: 200,
            code: None,
            kind: None,
            message: "response contained no choices".to_string(),
        })?;

    let mut message = match choice.message {
        Some(raw) => {
            let mut message = BackendMessage::new(parse_role(raw.role.as_deref()));
            message.content = raw.content.map(|content| content.into_text()).unwrap_or_default();
            message.name = raw.name;
            message.tool_calls = raw
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(convert_tool_call)
                .collect();
            message
        }
        None => BackendMessage::new(BackendRole::Assistant),
    };
    message.response_meta = Some(ResponseMeta {
        finish_reason: choice.finish_reason.filter(|reason| !reason.is_empty()),
        usage,
    });
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> OpenAiChatResponse {
        serde_json::from_str(raw).expect("response json")
    }

    #[test]
    fn maps_text_choice_with_usage() {
        let message = map_response(
            parse(
                r#"{"id":"x","object":"chat.completion","created":1,"model":"gpt-4o",
                "choices":[{"index":0,"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}],
                "usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
            ),
            "azure",
        )
        .expect("message");

        assert_eq!(message.role, BackendRole::Assistant);
        assert_eq!(message.content, "hello");
        assert_eq!(message.finish_reason(), Some("stop"));
        let usage = message.response_meta.and_then(|meta| meta.usage).expect("usage");
        assert_eq!(usage.total_tokens, 4);
    }

    #[test]
    fn maps_tool_calls_and_null_content() {
        let message = map_response(
            parse(
                r#"{"choices":[{"index":0,"finish_reason":"tool_calls","message":{"role":"assistant","content":null,
                "tool_calls":[{"id":"call_9","type":"function","function":{"name":"weather","arguments":"{\"city\":\"Paris\"}"}}]}}]}"#,
            ),
            "azure",
        )
        .expect("message");

        assert!(message.content.is_empty());
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].id, "call_9");
        assert_eq!(message.tool_calls[0].kind, "function");
        assert_eq!(message.tool_calls[0].arguments, "{\"city\":\"Paris\"}");
        assert_eq!(message.finish_reason(), Some("tool_calls"));
    }

    #[test]
    fn empty_choices_is_backend_error() {
        let err = map_response(parse(r#"{"choices":[]}"#), "deepseek").expect_err("no choices");
        assert!(matches!(err, LLMError::BackendApi { provider: "deepseek", .. }));
    }
}
