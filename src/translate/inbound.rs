use tracing::warn;

use crate::schema::{BackendMessage, BackendPart, BackendRole, BackendToolCall, TokenUsage};
use crate::types::{
    Choice, Delta, FinishReason, FunctionCall, ResponseMessage, Role, StreamChoice, ToolCall,
    ToolType, Usage,
};

/// Converts a complete backend reply into the canonical choice at `index`.
pub fn from_backend_message(message: BackendMessage, index: usize) -> Choice {
    let finish_reason = finish_reason(&message);
    let role = canonical_role(&message.role);
    let text = collect_text(&message);
    let content = if text.is_empty() && !message.tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };
    Choice {
        index,
        message: ResponseMessage {
            role,
            content,
            tool_calls: from_backend_tool_calls(message.tool_calls),
        },
        finish_reason,
    }
}

/// Converts the tool calls of a complete reply. Stream indices are not carried.
pub fn from_backend_tool_calls(calls: Vec<BackendToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .map(|call| ToolCall {
            index: None,
            id: call.id,
            kind: coerce_tool_type(call.kind),
            function: FunctionCall {
                name: call.name,
                arguments: call.arguments,
            },
        })
        .collect()
}

/// Converts the tool-call fragments of one stream delta, keeping the index that correlates
/// fragments across chunks. A missing index defaults to 0.
pub fn from_backend_stream_tool_calls(calls: Vec<BackendToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .map(|call| {
            let index = call.index.unwrap_or_else(|| {
                warn!(id = %call.id, "stream tool call has no index, using 0");
                0
            });
            ToolCall {
                index: Some(index),
                id: call.id,
                kind: coerce_tool_type(call.kind),
                function: FunctionCall {
                    name: call.name,
                    arguments: call.arguments,
                },
            }
        })
        .collect()
}

/// Converts one partial backend message into a stream choice. `include_role` is set for
/// the first chunk of a stream.
pub fn to_stream_choice(message: BackendMessage, include_role: bool) -> StreamChoice {
    let finish_reason = finish_reason(&message);
    let role = include_role.then(|| canonical_role(&message.role));
    let content = collect_text(&message);
    StreamChoice {
        index: 0,
        delta: Delta {
            role,
            content: (!content.is_empty()).then_some(content),
            tool_calls: from_backend_stream_tool_calls(message.tool_calls),
        },
        finish_reason,
    }
}

/// Usage reported on a backend message, if any.
pub fn usage_of(message: &BackendMessage) -> Option<Usage> {
    message
        .response_meta
        .as_ref()
        .and_then(|meta| meta.usage)
        .map(canonical_usage)
}

pub fn canonical_usage(usage: TokenUsage) -> Usage {
    Usage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

fn finish_reason(message: &BackendMessage) -> Option<FinishReason> {
    message
        .finish_reason()
        .map(|reason| FinishReason::from(reason.to_string()))
}

fn canonical_role(role: &BackendRole) -> Role {
    match role {
        BackendRole::System => Role::System,
        BackendRole::User => Role::User,
        BackendRole::Assistant => Role::Assistant,
        BackendRole::Tool => Role::Tool,
        BackendRole::Other(value) => Role::Other(value.clone()),
    }
}

fn collect_text(message: &BackendMessage) -> String {
    if message.parts.is_empty() {
        return message.content.clone();
    }
    message
        .parts
        .iter()
        .filter_map(|part| match part {
            BackendPart::Text(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Empty types (later stream fragments) are read as function silently; any other
/// unknown type is coerced with a warning.
fn coerce_tool_type(kind: String) -> ToolType {
    if kind.is_empty() {
        return ToolType::Function;
    }
    match ToolType::from(kind) {
        ToolType::Unknown(other) => {
            warn!(kind = %other, "unknown tool call type from backend, treating as function");
            ToolType::Function
        }
        known => known,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ResponseMeta;

    fn backend_call(kind: &str, index: Option<usize>) -> BackendToolCall {
        BackendToolCall {
            index,
            id: "call_7".to_string(),
            kind: kind.to_string(),
            name: "lookup".to_string(),
            arguments: "{}".to_string(),
        }
    }

    #[test]
    fn reply_maps_to_choice_with_finish_reason() {
        let mut message = BackendMessage::text(BackendRole::Assistant, "hello");
        message.tool_calls = vec![backend_call("function", Some(3))];
        message.response_meta = Some(ResponseMeta {
            finish_reason: Some("stop".to_string()),
            usage: Some(TokenUsage {
                prompt_tokens: 2,
                completion_tokens: 1,
                total_tokens: 3,
            }),
        });
        assert_eq!(usage_of(&message).map(|usage| usage.total_tokens), Some(3));

        let choice = from_backend_message(message, 0);
        assert_eq!(choice.message.role, Role::Assistant);
        assert_eq!(choice.message.content.as_deref(), Some("hello"));
        assert_eq!(choice.finish_reason, Some(FinishReason::Stop));
        assert_eq!(choice.message.tool_calls[0].index, None);
        assert_eq!(choice.message.tool_calls[0].kind, ToolType::Function);
    }

    #[test]
    fn tool_call_only_reply_has_null_content() {
        let mut message = BackendMessage::new(BackendRole::Assistant);
        message.tool_calls = vec![backend_call("function", None)];
        let choice = from_backend_message(message, 0);
        assert_eq!(choice.message.content, None);
        let json = serde_json::to_value(&choice).expect("json");
        assert!(json["message"]["content"].is_null());
        assert_eq!(json["message"]["tool_calls"][0]["function"]["name"], "lookup");

        let empty = from_backend_message(BackendMessage::new(BackendRole::Assistant), 0);
        assert_eq!(empty.message.content.as_deref(), Some(""));
    }

    #[test]
    fn unknown_tool_types_become_function() {
        let calls = from_backend_tool_calls(vec![backend_call("retrieval", None)]);
        assert_eq!(calls[0].kind, ToolType::Function);
        assert_eq!(calls[0].function.name, "lookup");
    }

    #[test]
    fn stream_tool_calls_keep_or_default_index() {
        let calls = from_backend_stream_tool_calls(vec![
            backend_call("function", Some(2)),
            backend_call("", None),
        ]);
        assert_eq!(calls[0].index, Some(2));
        assert_eq!(calls[1].index, Some(0));
        assert_eq!(calls[1].kind, ToolType::Function);
    }

    #[test]
    fn empty_finish_reason_is_not_set() {
        let mut message = BackendMessage::text(BackendRole::Assistant, "partial");
        message.response_meta = Some(ResponseMeta {
            finish_reason: Some(String::new()),
            usage: None,
        });
        let choice = to_stream_choice(message, false);
        assert_eq!(choice.finish_reason, None);
        assert_eq!(choice.delta.content.as_deref(), Some("partial"));
        assert!(choice.delta.role.is_none());
    }
}
