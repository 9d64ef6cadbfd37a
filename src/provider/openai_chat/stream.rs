use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::provider::BackendStream;
use crate::schema::{BackendMessage, ResponseMeta};
use crate::stream::{SseEvent, SseStream, decode_sse};

use super::response::{convert_tool_call, convert_usage, parse_role};
use super::types::OpenAiStreamChunk;

/// OpenAI-wire SSE body exposed as a [`BackendStream`].
pub(crate) struct OpenAiChatStream {
    provider: &'static str,
    events: Option<SseStream>,
}

impl OpenAiChatStream {
    pub(crate) fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            provider,
            events: Some(decode_sse(body, provider)),
        }
    }
}

#[async_trait]
impl BackendStream for OpenAiChatStream {
    async fn recv(&mut self) -> Result<Option<BackendMessage>, LLMError> {
        loop {
            let Some(events) = self.events.as_mut() else {
                return Ok(None);
            };
            match events.next().await {
                None | Some(Ok(SseEvent::Done)) => {
                    self.close();
                    return Ok(None);
                }
                Some(Err(err)) => {
                    self.close();
                    return Err(err);
                }
                Some(Ok(SseEvent::Data(data))) => {
                    let chunk: OpenAiStreamChunk = match serde_json::from_str(&data) {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            self.close();
                            return Err(LLMError::stream(
                                self.provider,
                                format!("failed to parse stream chunk: {err}"),
                            ));
                        }
                    };
                    if let Some(message) = convert_chunk(chunk) {
                        return Ok(Some(message));
                    }
                    debug!(provider = self.provider, "skipping empty stream chunk");
                }
            }
        }
    }

    fn close(&mut self) {
        self.events = None;
    }
}

/// Turns one chunk into a partial message. Chunks with neither a choice nor usage,
/// such as Azure's leading content-filter chunk, yield `None`.
fn convert_chunk(chunk: OpenAiStreamChunk) -> Option<BackendMessage> {
    let usage = chunk.usage.map(convert_usage);
    let choice = chunk.choices.into_iter().next();
    if choice.is_none() && usage.is_none() {
        return None;
    }

    let (delta, finish_reason) = match choice {
        Some(choice) => (choice.delta, choice.finish_reason),
        None => (None, None),
    };
    let mut message = BackendMessage::new(parse_role(
        delta.as_ref().and_then(|delta| delta.role.as_deref()),
    ));
    if let Some(delta) = delta {
        message.content = delta.content.map(|content| content.into_text()).unwrap_or_default();
        message.tool_calls = delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(convert_tool_call)
            .collect();
    }

    let finish_reason = finish_reason.filter(|reason| !reason.is_empty());
    if finish_reason.is_some() || usage.is_some() {
        message.response_meta = Some(ResponseMeta {
            finish_reason,
            usage,
        });
    }
    Some(message)
}
