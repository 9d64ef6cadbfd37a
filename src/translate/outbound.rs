use tracing::warn;

use crate::error::LLMError;
use crate::schema::{BackendMessage, BackendPart, BackendRole, BackendToolCall, MediaSource};
use crate::types::{ContentPart, Message, MessageContent, Role, ToolCall, ToolType};

use super::media::{
    DEFAULT_AUDIO_MIME, DEFAULT_FILE_MIME, DEFAULT_FILE_NAME, DEFAULT_VIDEO_MIME, MediaResolver,
    resolve_reference,
};

/// Converts canonical messages into backend messages, in order.
///
/// Role and name pass through. Image parts are inlined through `media`; a failed fetch keeps
/// the URL. Non-function tool calls are dropped with a warning.
///
/// # Errors
///
/// Returns [`LLMError::Validation`] for a tool message without `tool_call_id`.
pub async fn to_backend_messages(
    messages: &[Message],
    media: &MediaResolver,
) -> Result<Vec<BackendMessage>, LLMError> {
    let mut out = Vec::with_capacity(messages.len());
    for (position, message) in messages.iter().enumerate() {
        out.push(to_backend_message(position, message, media).await?);
    }
    Ok(out)
}

async fn to_backend_message(
    position: usize,
    message: &Message,
    media: &MediaResolver,
) -> Result<BackendMessage, LLMError> {
    let role = backend_role(&message.role);
    if role == BackendRole::Tool
        && message
            .tool_call_id
            .as_deref()
            .is_none_or(|id| id.trim().is_empty())
    {
        return Err(LLMError::Validation {
            message: format!("tool message at position {position} has no tool_call_id"),
        });
    }

    let mut backend = BackendMessage::new(role);
    backend.name = message.name.clone();
    backend.tool_call_id = message.tool_call_id.clone();

    match &message.content {
        MessageContent::Text(text) => backend.content = text.clone(),
        MessageContent::Parts(parts) => {
            for part in parts {
                backend.parts.push(to_backend_part(part, media).await);
            }
        }
    }

    if !message.tool_calls.is_empty() {
        if message.role != Role::Assistant {
            warn!(role = message.role.as_str(), position, "tool calls on a non-assistant message");
        }
        backend.tool_calls = message
            .tool_calls
            .iter()
            .filter_map(|call| to_backend_tool_call(call, position))
            .collect();
    }
    Ok(backend)
}

fn backend_role(role: &Role) -> BackendRole {
    match role {
        Role::System => BackendRole::System,
        Role::User => BackendRole::User,
        Role::Assistant => BackendRole::Assistant,
        Role::Tool => BackendRole::Tool,
        Role::Other(value) => BackendRole::Other(value.clone()),
    }
}

fn to_backend_tool_call(call: &ToolCall, position: usize) -> Option<BackendToolCall> {
    match &call.kind {
        ToolType::Function => Some(BackendToolCall {
            index: call.index,
            id: call.id.clone(),
            kind: "function".to_string(),
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        }),
        ToolType::Unknown(kind) => {
            warn!(kind = %kind, id = %call.id, position, "dropping non-function tool call");
            None
        }
    }
}

async fn to_backend_part(part: &ContentPart, media: &MediaResolver) -> BackendPart {
    match part {
        ContentPart::Text { text } => BackendPart::Text(text.clone()),
        ContentPart::ImageUrl { image_url } => BackendPart::Image(
            media
                .resolve_image(&image_url.url, image_url.mime_type.as_deref())
                .await,
        ),
        ContentPart::InputAudio { input_audio } => {
            let format = input_audio.format.trim();
            let mime_type = if format.is_empty() {
                DEFAULT_AUDIO_MIME.to_string()
            } else if format.contains('/') {
                format.to_string()
            } else {
                format!("audio/{format}")
            };
            BackendPart::Audio(MediaSource::Inline {
                data: input_audio.data.clone(),
                mime_type,
            })
        }
        ContentPart::AudioUrl { audio_url } => BackendPart::Audio(resolve_reference(
            &audio_url.url,
            audio_url.mime_type.as_deref(),
            DEFAULT_AUDIO_MIME,
        )),
        ContentPart::VideoUrl { video_url } => BackendPart::Video(resolve_reference(
            &video_url.url,
            video_url.mime_type.as_deref(),
            DEFAULT_VIDEO_MIME,
        )),
        ContentPart::FileUrl { file_url } => BackendPart::File {
            source: resolve_reference(&file_url.url, file_url.mime_type.as_deref(), DEFAULT_FILE_MIME),
            name: file_url
                .name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileUrl, FunctionCall, InputAudio, MediaUrl};

    fn call(kind: ToolType, id: &str) -> ToolCall {
        ToolCall {
            index: None,
            id: id.to_string(),
            kind,
            function: FunctionCall {
                name: "lookup".to_string(),
                arguments: "{\"q\":\"rust\"}".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn text_messages_keep_role_name_and_content() {
        let mut user = Message::user("hi");
        user.name = Some("alice".to_string());
        let messages = to_backend_messages(&[Message::system("be brief"), user], &MediaResolver::offline())
            .await
            .expect("translate");

        assert_eq!(messages[0], BackendMessage::text(BackendRole::System, "be brief"));
        assert_eq!(messages[1].role, BackendRole::User);
        assert_eq!(messages[1].name.as_deref(), Some("alice"));
        assert_eq!(messages[1].content, "hi");
        assert!(messages[1].parts.is_empty());
    }

    #[tokio::test]
    async fn non_function_tool_calls_are_dropped() {
        let mut assistant = Message::text(Role::Assistant, "");
        assistant.tool_calls = vec![
            call(ToolType::Function, "call_1"),
            call(ToolType::Unknown("code_interpreter".to_string()), "call_2"),
        ];
        let messages = to_backend_messages(&[assistant], &MediaResolver::offline())
            .await
            .expect("translate");

        assert_eq!(messages[0].tool_calls.len(), 1);
        let kept = &messages[0].tool_calls[0];
        assert_eq!(kept.id, "call_1");
        assert_eq!(kept.kind, "function");
        assert_eq!(kept.name, "lookup");
        assert_eq!(kept.arguments, "{\"q\":\"rust\"}");
    }

    #[tokio::test]
    async fn tool_message_requires_call_id() {
        let tool = Message::text(Role::Tool, "42");
        let err = to_backend_messages(&[tool], &MediaResolver::offline())
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, LLMError::Validation { .. }));
    }

    #[tokio::test]
    async fn media_parts_get_mime_defaults() {
        let mut user = Message::user("");
        user.content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "look".to_string(),
            },
            ContentPart::ImageUrl {
                image_url: MediaUrl {
                    url: "https://example.com/cat.webp".to_string(),
                    ..Default::default()
                },
            },
            ContentPart::InputAudio {
                input_audio: InputAudio {
                    data: "AAAA".to_string(),
                    format: "wav".to_string(),
                },
            },
            ContentPart::VideoUrl {
                video_url: MediaUrl {
                    url: "https://example.com/stream".to_string(),
                    ..Default::default()
                },
            },
            ContentPart::FileUrl {
                file_url: FileUrl {
                    url: "JVBERi0x".to_string(),
                    ..Default::default()
                },
            },
        ]);
        let messages = to_backend_messages(&[user], &MediaResolver::offline())
            .await
            .expect("translate");
        let parts = &messages[0].parts;

        assert_eq!(parts[0], BackendPart::Text("look".to_string()));
        assert_eq!(
            parts[1],
            BackendPart::Image(MediaSource::Url {
                url: "https://example.com/cat.webp".to_string(),
                mime_type: None,
            })
        );
        assert!(matches!(&parts[2], BackendPart::Audio(source) if source.mime_type() == Some("audio/wav")));
        assert!(matches!(&parts[3], BackendPart::Video(source) if source.mime_type() == Some("video/mp4")));
        match &parts[4] {
            BackendPart::File { source, name } => {
                assert_eq!(name, "file.pdf");
                assert_eq!(source.mime_type(), Some("application/pdf"));
            }
            other => panic!("unexpected part: {other:?}"),
        }
    }
}
