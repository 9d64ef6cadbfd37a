//! Server-sent-event decoding for OpenAI-wire backends.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream;

use crate::error::LLMError;
use crate::http::HttpBodyStream;

/// Decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// `data:` payload, multi-line payloads joined with `\n`.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental SSE parser. Only `data:` fields are kept; comments and other fields are ignored.
#[derive(Debug)]
pub struct SseParser {
    provider: &'static str,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    done: bool,
}

impl SseParser {
    pub fn new(provider: &'static str) -> Self {
        Self {
            provider,
            buffer: Vec::new(),
            data_lines: Vec::new(),
            done: false,
        }
    }

    /// Whether `[DONE]` has been seen. Input after it is discarded.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds raw bytes and returns every event completed by them.
    pub fn feed(&mut self, bytes: &[u8], out: &mut VecDeque<SseEvent>) -> Result<(), LLMError> {
        if self.done {
            return Ok(());
        }
        self.buffer.extend_from_slice(bytes);
        while let Some(line) = take_line(&mut self.buffer) {
            if line.is_empty() {
                self.dispatch(out)?;
                if self.done {
                    self.buffer.clear();
                    break;
                }
            } else if let Some(rest) = line.strip_prefix(b"data:") {
                let rest = rest.strip_prefix(b" ").unwrap_or(rest);
                self.data_lines.push(rest.to_vec());
            }
        }
        Ok(())
    }

    /// Flushes a trailing event that was not followed by a blank line.
    pub fn finish(&mut self, out: &mut VecDeque<SseEvent>) -> Result<(), LLMError> {
        if self.done {
            return Ok(());
        }
        if !self.buffer.is_empty() {
            let mut tail = std::mem::take(&mut self.buffer);
            tail.push(b'\n');
            self.feed(&tail, out)?;
        }
        self.dispatch(out)
    }

    fn dispatch(&mut self, out: &mut VecDeque<SseEvent>) -> Result<(), LLMError> {
        if self.data_lines.is_empty() {
            return Ok(());
        }
        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        let data = String::from_utf8(joined).map_err(|err| {
            LLMError::stream(self.provider, format!("invalid UTF-8 in stream chunk: {err}"))
        })?;
        if data.trim() == "[DONE]" {
            self.done = true;
            out.push_back(SseEvent::Done);
        } else if !data.is_empty() {
            out.push_back(SseEvent::Data(data));
        }
        Ok(())
    }
}

fn take_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = buffer.iter().position(|b| *b == b'\n')?;
    let mut line: Vec<u8> = buffer.drain(..=pos).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}

/// Stream of decoded SSE events.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent, LLMError>> + Send>>;

struct DecodeState {
    body: HttpBodyStream,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

/// Wraps an HTTP body and yields SSE events until `[DONE]`, end of body or the first error.
pub fn decode_sse(body: HttpBodyStream, provider: &'static str) -> SseStream {
    let state = DecodeState {
        body,
        parser: SseParser::new(provider),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished || state.parser.is_done() {
                return None;
            }
            let step = match state.body.next().await {
                Some(Ok(bytes)) => state.parser.feed(&bytes, &mut state.pending),
                Some(Err(err)) => Err(err.into_stream(state.parser.provider)),
                None => {
                    state.finished = true;
                    state.parser.finish(&mut state.pending)
                }
            };
            if let Err(err) = step {
                state.finished = true;
                state.pending.clear();
                return Some((Err(err), state));
            }
        }
    }))
}
