//! Conversion between the canonical OpenAI-compatible shapes and backend messages.

pub mod inbound;
pub mod media;
pub mod outbound;
pub mod tools;

pub use inbound::{
    from_backend_message, from_backend_stream_tool_calls, from_backend_tool_calls,
    to_stream_choice, usage_of,
};
pub use media::MediaResolver;
pub use outbound::to_backend_messages;
pub use tools::{ToolBindingMode, bind_tools, to_tool_infos};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BackendMessage, BackendPart, BackendRole, MediaSource};
    use crate::types::{ContentPart, MediaUrl, Message, MessageContent};

    #[tokio::test]
    async fn text_round_trips_through_backend_message() {
        let outbound = to_backend_messages(&[Message::user("round trip")], &MediaResolver::offline())
            .await
            .expect("translate");
        let mut reply = outbound.into_iter().next().expect("message");
        reply.role = BackendRole::Assistant;
        let choice = from_backend_message(reply, 0);
        assert_eq!(choice.message.content.as_deref(), Some("round trip"));
    }

    #[tokio::test]
    async fn image_part_keeps_its_semantic_type() {
        let mut user = Message::user("");
        user.content = MessageContent::Parts(vec![ContentPart::ImageUrl {
            image_url: MediaUrl {
                url: "data:image/png;base64,iVBORw0KGgo=".to_string(),
                ..Default::default()
            },
        }]);
        let outbound = to_backend_messages(&[user], &MediaResolver::offline())
            .await
            .expect("translate");
        let BackendMessage { parts, .. } = &outbound[0];
        assert_eq!(
            parts[0],
            BackendPart::Image(MediaSource::Inline {
                data: "iVBORw0KGgo=".to_string(),
                mime_type: "image/png".to_string(),
            })
        );
    }
}
