use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::provider::BackendStream;
use crate::schema::{BackendMessage, BackendRole, BackendToolCall, ResponseMeta};

use super::eventstream::{EventFrame, EventStreamDecoder};
use super::response::{convert_usage, normalize_stop_reason};
use super::types::{
    ContentBlockDeltaEvent, ContentBlockStartEvent, MessageStartEvent, MessageStopEvent,
    MetadataEvent,
};

const PROVIDER: &str = "bedrock";

/// ConverseStream body exposed as a [`BackendStream`].
///
/// Tool-use blocks are addressed by `contentBlockIndex`, which counts text blocks too;
/// they are renumbered so tool call indices start at zero. The `messageStop` event is held
/// back until the trailing `metadata` event so the finish reason and usage arrive together
/// on the last message.
pub(crate) struct BedrockStream {
    body: Option<HttpBodyStream>,
    decoder: EventStreamDecoder,
    tool_slots: HashMap<usize, usize>,
    pending_stop: Option<BackendMessage>,
    ready: VecDeque<BackendMessage>,
}

impl BedrockStream {
    pub(crate) fn new(body: HttpBodyStream) -> Self {
        Self {
            body: Some(body),
            decoder: EventStreamDecoder::new(),
            tool_slots: HashMap::new(),
            pending_stop: None,
            ready: VecDeque::new(),
        }
    }

    fn accept(&mut self, message: BackendMessage) -> Option<BackendMessage> {
        if message.finish_reason().is_some() {
            self.pending_stop = Some(message);
            return None;
        }
        let usage_only = message.content.is_empty()
            && message.tool_calls.is_empty()
            && message
                .response_meta
                .as_ref()
                .is_some_and(|meta| meta.usage.is_some());
        match self.pending_stop.take() {
            Some(mut stop) if usage_only => {
                if let (Some(stop_meta), Some(meta)) = (stop.response_meta.as_mut(), message.response_meta) {
                    stop_meta.usage = meta.usage;
                }
                Some(stop)
            }
            Some(stop) => {
                self.ready.push_back(message);
                Some(stop)
            }
            None => Some(message),
        }
    }

    async fn next_frame(&mut self) -> Result<Option<EventFrame>, LLMError> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(Some(frame));
            }
            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };
            match body.next().await {
                Some(Ok(chunk)) => self.decoder.push(&chunk),
                Some(Err(err)) => {
                    self.body = None;
                    return Err(err.into_stream(PROVIDER));
                }
                None => {
                    self.body = None;
                    if self.decoder.pending() > 0 {
                        return Err(LLMError::stream(
                            PROVIDER,
                            format!("stream ended inside a frame ({} bytes left)", self.decoder.pending()),
                        ));
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn convert_frame(&mut self, frame: &EventFrame) -> Result<Option<BackendMessage>, LLMError> {
        match frame.header_str(":message-type") {
            Some("exception") | Some("error") => {
                let kind = frame
                    .header_str(":exception-type")
                    .or_else(|| frame.header_str(":error-code"))
                    .unwrap_or("unknown");
                let detail = String::from_utf8_lossy(&frame.payload);
                return Err(LLMError::stream(PROVIDER, format!("{kind}: {detail}")));
            }
            _ => {}
        }

        let event_type = frame.header_str(":event-type").unwrap_or_default();
        let message = match event_type {
            "messageStart" => {
                let event: MessageStartEvent = parse_payload(frame)?;
                match event.role.as_deref() {
                    None | Some("assistant") => BackendMessage::new(BackendRole::Assistant),
                    Some(_) => return Ok(None),
                }
            }
            "contentBlockStart" => {
                let event: ContentBlockStartEvent = parse_payload(frame)?;
                let Some(tool_use) = event.start.and_then(|start| start.tool_use) else {
                    return Ok(None);
                };
                let ordinal = self.tool_slot(event.content_block_index);
                let mut message = BackendMessage::new(BackendRole::Assistant);
                message.tool_calls.push(BackendToolCall {
                    index: Some(ordinal),
                    id: tool_use.tool_use_id,
                    kind: "function".to_string(),
                    name: tool_use.name,
                    arguments: String::new(),
                });
                message
            }
            "contentBlockDelta" => {
                let event: ContentBlockDeltaEvent = parse_payload(frame)?;
                let Some(delta) = event.delta else {
                    return Ok(None);
                };
                let mut message = BackendMessage::new(BackendRole::Assistant);
                if let Some(text) = delta.text {
                    message.content = text;
                }
                if let Some(tool_use) = delta.tool_use {
                    let ordinal = self.tool_slot(event.content_block_index);
                    message.tool_calls.push(BackendToolCall {
                        index: Some(ordinal),
                        id: String::new(),
                        kind: String::new(),
                        name: String::new(),
                        arguments: tool_use.input,
                    });
                }
                message
            }
            "messageStop" => {
                let event: MessageStopEvent = parse_payload(frame)?;
                let mut message = BackendMessage::new(BackendRole::Assistant);
                message.response_meta = Some(ResponseMeta {
                    finish_reason: event
                        .stop_reason
                        .filter(|reason| !reason.is_empty())
                        .map(|reason| normalize_stop_reason(&reason)),
                    usage: None,
                });
                message
            }
            "metadata" => {
                let event: MetadataEvent = parse_payload(frame)?;
                let Some(usage) = event.usage else {
                    return Ok(None);
                };
                let mut message = BackendMessage::new(BackendRole::Assistant);
                message.response_meta = Some(ResponseMeta {
                    finish_reason: None,
                    usage: Some(convert_usage(usage)),
                });
                message
            }
            other => {
                debug!(event_type = other, "skipping bedrock stream event");
                return Ok(None);
            }
        };
        Ok(Some(message))
    }

    fn tool_slot(&mut self, block_index: usize) -> usize {
        let next = self.tool_slots.len();
        *self.tool_slots.entry(block_index).or_insert(next)
    }
}

fn parse_payload<T: DeserializeOwned>(frame: &EventFrame) -> Result<T, LLMError> {
    serde_json::from_slice(&frame.payload).map_err(|err| {
        LLMError::stream(
            PROVIDER,
            format!(
                "failed to parse {} event: {err}",
                frame.header_str(":event-type").unwrap_or("unknown")
            ),
        )
    })
}

#[async_trait]
impl BackendStream for BedrockStream {
    async fn recv(&mut self) -> Result<Option<BackendMessage>, LLMError> {
        if let Some(message) = self.ready.pop_front() {
            return Ok(Some(message));
        }
        loop {
            let frame = match self.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(self.pending_stop.take()),
                Err(err) => {
                    self.close();
                    return Err(err);
                }
            };
            match self.convert_frame(&frame) {
                Ok(Some(message)) => {
                    if let Some(message) = self.accept(message) {
                        return Ok(Some(message));
                    }
                }
                Ok(None) => continue,
                Err(err) => {
                    self.close();
                    return Err(err);
                }
            }
        }
    }

    fn close(&mut self) {
        self.body = None;
        self.decoder = EventStreamDecoder::new();
        self.pending_stop = None;
        self.ready.clear();
    }
}
