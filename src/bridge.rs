//! Republishes a backend stream as canonical chunks, and writes chunks as SSE frames.
//!
//! [`bridge`] spawns one worker per stream. The worker is the only reader of the backend
//! stream and the only writer of a bounded channel; the caller drains the channel. The
//! backend stream is closed on every exit path of the worker, including a panic and the
//! consumer going away.

use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use chrono::Utc;
use futures_core::Stream;
use futures_util::{FutureExt, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::error::LLMError;
use crate::provider::{BackendStream, BoxBackendStream};
use crate::translate::to_stream_choice;
use crate::types::{CHAT_COMPLETION_CHUNK_OBJECT, ChatCompletionStreamResponse};

/// Capacity of the channel between the worker and the consumer.
pub const STREAM_BUFFER: usize = 10;

/// Terminal SSE frame.
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// Canonical chunk stream. An `Err` item is always the last one.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<ChatCompletionStreamResponse, LLMError>> + Send>>;

/// Closes the backend stream when dropped.
struct StreamLease(BoxBackendStream);

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Id, timestamp and model shared by every chunk of one stream.
#[derive(Debug, Clone)]
struct ChunkHeader {
    id: String,
    created: i64,
    model: String,
}

/// Bridges `stream` into a canonical chunk stream with ids of the form `{id_prefix}-{nanos}`.
///
/// Must be called inside a Tokio runtime.
pub fn bridge(stream: BoxBackendStream, model: impl Into<String>, id_prefix: &str) -> ChunkStream {
    let now = Utc::now();
    let header = ChunkHeader {
        id: format!("{id_prefix}-{}", now.timestamp_nanos_opt().unwrap_or_default()),
        created: now.timestamp(),
        model: model.into(),
    };
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);

    tokio::spawn(async move {
        let mut lease = StreamLease(stream);
        let id = header.id.clone();
        let outcome = AssertUnwindSafe(pump(lease.0.as_mut(), &tx, &header))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            error!(stream_id = %id, "stream worker panicked, closing stream");
        }
        drop(lease);
        drop(tx);
    });

    Box::pin(ReceiverStream::new(rx))
}

async fn pump(
    stream: &mut dyn BackendStream,
    tx: &mpsc::Sender<Result<ChatCompletionStreamResponse, LLMError>>,
    header: &ChunkHeader,
) {
    let mut first = true;
    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!(stream_id = %header.id, "stream consumer went away");
                return;
            }
            next = stream.recv() => next,
        };
        match next {
            Ok(None) => return,
            Ok(Some(message)) => {
                let chunk = ChatCompletionStreamResponse {
                    id: header.id.clone(),
                    object: CHAT_COMPLETION_CHUNK_OBJECT.to_string(),
                    created: header.created,
                    model: header.model.clone(),
                    choices: vec![to_stream_choice(message, first)],
                };
                first = false;
                if tx.send(Ok(chunk)).await.is_err() {
                    debug!(stream_id = %header.id, "stream consumer went away");
                    return;
                }
            }
            Err(err) => {
                warn!(stream_id = %header.id, error = %err, "backend stream failed");
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }
}

/// Writes `chunks` to `sink` as `data: {json}\n\n` frames and always ends with
/// `data: [DONE]\n\n`.
///
/// Chunks without choices are skipped. A chunk that fails to serialize aborts the stream
/// if nothing has been written yet and is skipped otherwise. A stream error is returned
/// after the terminal frame is written.
///
/// Returns the number of chunk frames written.
pub async fn write_sse<W>(mut chunks: ChunkStream, sink: &mut W) -> Result<usize, LLMError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0usize;
    let mut failure = None;

    while let Some(item) = chunks.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) => {
                failure = Some(err);
                break;
            }
        };
        if chunk.choices.is_empty() {
            warn!(stream_id = %chunk.id, "skipping chunk without choices");
            continue;
        }
        let json = match serde_json::to_string(&chunk) {
            Ok(json) => json,
            Err(err) if written == 0 => {
                failure = Some(LLMError::Serialization {
                    message: format!("failed to encode first chunk: {err}"),
                });
                break;
            }
            Err(err) => {
                warn!(stream_id = %chunk.id, error = %err, "skipping chunk that failed to encode");
                continue;
            }
        };
        write_frame(sink, &format!("data: {json}\n\n")).await?;
        written += 1;
    }
    drop(chunks);

    write_frame(sink, SSE_DONE).await?;
    sink.flush().await.map_err(io_error)?;
    match failure {
        Some(err) => Err(err),
        None => Ok(written),
    }
}

async fn write_frame<W>(sink: &mut W, frame: &str) -> Result<(), LLMError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    sink.write_all(frame.as_bytes()).await.map_err(io_error)
}

fn io_error(err: std::io::Error) -> LLMError {
    LLMError::transport(format!("failed to write SSE frame: {err}"))
}
