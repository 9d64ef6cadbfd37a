//! Resolution of multi-modal part references into backend media sources.
//!
//! Images are inlined whenever possible: remote URLs are fetched and base64-encoded, and
//! a failed or oversized fetch degrades to passing the URL through. Audio, video and file references
//! are never fetched; only their MIME type is resolved.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::http::{DynHttpTransport, HttpRequest};
use crate::schema::MediaSource;

pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";
pub const DEFAULT_AUDIO_MIME: &str = "audio/mp3";
pub const DEFAULT_VIDEO_MIME: &str = "video/mp4";
pub const DEFAULT_FILE_MIME: &str = "application/pdf";
pub const DEFAULT_FILE_NAME: &str = "file.pdf";

/// Largest image body inlined by default.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches and inlines image URLs through an HTTP transport.
#[derive(Clone)]
pub struct MediaResolver {
    transport: Option<DynHttpTransport>,
    timeout: Duration,
    max_bytes: usize,
}

impl MediaResolver {
    pub fn new(transport: DynHttpTransport) -> Self {
        Self {
            transport: Some(transport),
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    /// A resolver that never fetches; remote image URLs pass through unchanged.
    pub fn offline() -> Self {
        Self {
            transport: None,
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Images larger than `max_bytes` are passed through by URL instead of inlined.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Resolves an image reference. Never fails.
    pub async fn resolve_image(&self, url: &str, declared_mime: Option<&str>) -> MediaSource {
        if let Some((mime_type, data)) = split_data_url(url) {
            return MediaSource::Inline {
                data: data.to_string(),
                mime_type: declared_mime.map(str::to_string).unwrap_or(mime_type),
            };
        }
        if !is_remote(url) {
            let mime_type = declared_mime
                .map(str::to_string)
                .or_else(|| sniff_base64(url).map(str::to_string))
                .unwrap_or_else(|| mime_from_suffix(url).unwrap_or(DEFAULT_IMAGE_MIME).to_string());
            return MediaSource::Inline {
                data: url.to_string(),
                mime_type,
            };
        }

        let Some(transport) = &self.transport else {
            debug!(url, "no media transport configured, passing image url through");
            return remote(url, declared_mime);
        };
        let Some((body, content_type)) = self.fetch(transport, url).await else {
            return remote(url, declared_mime);
        };
        let mime_type = declared_mime
            .map(str::to_string)
            .or_else(|| {
                content_type
                    .map(|value| value.split(';').next().unwrap_or(&value).trim().to_ascii_lowercase())
                    .filter(|value| value.starts_with("image/"))
            })
            .or_else(|| sniff_bytes(&body).map(str::to_string))
            .unwrap_or_else(|| mime_from_suffix(url).unwrap_or(DEFAULT_IMAGE_MIME).to_string());
        MediaSource::Inline {
            data: general_purpose::STANDARD.encode(&body),
            mime_type,
        }
    }

    /// Downloads at most `max_bytes` of an image. `None` means the URL should pass through.
    async fn fetch(&self, transport: &DynHttpTransport, url: &str) -> Option<(Vec<u8>, Option<String>)> {
        let request = HttpRequest::get(url).with_timeout(self.timeout);
        let mut response = match transport.send_stream(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(url, error = %err, "image fetch failed, passing url through");
                return None;
            }
        };
        if !response.is_success() {
            warn!(url, status = response.status, "image fetch failed, passing url through");
            return None;
        }
        let declared_len = response
            .header("content-length")
            .and_then(|value| value.trim().parse::<usize>().ok());
        if declared_len.is_some_and(|len| len > self.max_bytes) {
            warn!(url, max_bytes = self.max_bytes, "image too large to inline, passing url through");
            return None;
        }

        let content_type = response.header("content-type").map(str::to_string);
        let mut body = Vec::with_capacity(declared_len.unwrap_or_default());
        while let Some(chunk) = response.body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(url, error = %err, "image fetch failed, passing url through");
                    return None;
                }
            };
            if body.len() + chunk.len() > self.max_bytes {
                warn!(url, max_bytes = self.max_bytes, "image too large to inline, passing url through");
                return None;
            }
            body.extend_from_slice(&chunk);
        }
        if body.is_empty() {
            warn!(url, "image fetch returned an empty body, passing url through");
            return None;
        }
        Some((body, content_type))
    }
}

impl Default for MediaResolver {
    fn default() -> Self {
        Self::offline()
    }
}

/// Resolves an audio, video or file reference without fetching it.
pub fn resolve_reference(url: &str, declared_mime: Option<&str>, default_mime: &str) -> MediaSource {
    if let Some((mime_type, data)) = split_data_url(url) {
        return MediaSource::Inline {
            data: data.to_string(),
            mime_type: declared_mime.map(str::to_string).unwrap_or(mime_type),
        };
    }
    let mime_type = declared_mime
        .map(str::to_string)
        .or_else(|| mime_from_suffix(url).map(str::to_string))
        .unwrap_or_else(|| default_mime.to_string());
    if is_remote(url) {
        MediaSource::Url {
            url: url.to_string(),
            mime_type: Some(mime_type),
        }
    } else {
        MediaSource::Inline {
            data: url.to_string(),
            mime_type,
        }
    }
}

fn remote(url: &str, declared_mime: Option<&str>) -> MediaSource {
    MediaSource::Url {
        url: url.to_string(),
        mime_type: declared_mime.map(str::to_string),
    }
}

fn is_remote(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || url.starts_with("s3://")
}

/// `data:image/png;base64,AAAA` -> (`image/png`, `AAAA`).
pub fn split_data_url(url: &str) -> Option<(String, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime_type = meta.split(';').next().filter(|mime| !mime.is_empty())?;
    Some((mime_type.to_ascii_lowercase(), data))
}

/// MIME type from the magic bytes of an image or document.
pub fn sniff_bytes(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        [b'%', b'P', b'D', b'F', ..] => Some("application/pdf"),
        _ => None,
    }
}

fn sniff_base64(data: &str) -> Option<&'static str> {
    // 16 base64 chars decode to the 12 bytes the longest signature needs
    let head = data.get(..16)?;
    let bytes = general_purpose::STANDARD.decode(head).ok()?;
    sniff_bytes(&bytes)
}

/// MIME type from a URL's file extension, ignoring query and fragment.
pub fn mime_from_suffix(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mp3",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "html" => "text/html",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LLMError;
    use crate::http::{HttpResponse, HttpStreamResponse, HttpTransport};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct FixedTransport {
        status: u16,
        content_type: Option<&'static str>,
        body: Vec<u8>,
    }

    impl FixedTransport {
        fn headers(&self) -> HashMap<String, String> {
            let mut headers = HashMap::new();
            if let Some(content_type) = self.content_type {
                headers.insert("Content-Type".to_string(), content_type.to_string());
            }
            headers
        }
    }

    #[async_trait]
    impl HttpTransport for FixedTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
            Ok(HttpResponse {
                status: self.status,
                headers: self.headers(),
                body: self.body.clone(),
            })
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            // two chunks so size checks see a partially read body
            let (head, tail) = self.body.split_at(self.body.len() / 2);
            let chunks: Vec<Result<Vec<u8>, LLMError>> = vec![Ok(head.to_vec()), Ok(tail.to_vec())];
            Ok(HttpStreamResponse {
                status: self.status,
                headers: self.headers(),
                body: Box::pin(futures_util::stream::iter(chunks)),
            })
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl HttpTransport for FailingTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
            Err(LLMError::transport("connection refused"))
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            Err(LLMError::transport("connection refused"))
        }
    }

    const PNG_HEAD: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[tokio::test]
    async fn fetched_image_is_inlined_with_sniffed_mime() {
        let resolver = MediaResolver::new(Arc::new(FixedTransport {
            status: 200,
            content_type: Some("application/octet-stream"),
            body: PNG_HEAD.to_vec(),
        }));
        let source = resolver.resolve_image("https://example.com/pic", None).await;
        assert_eq!(
            source,
            MediaSource::Inline {
                data: general_purpose::STANDARD.encode(PNG_HEAD),
                mime_type: "image/png".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn content_type_header_wins_over_suffix() {
        let resolver = MediaResolver::new(Arc::new(FixedTransport {
            status: 200,
            content_type: Some("image/webp; charset=binary"),
            body: vec![1, 2, 3],
        }));
        let source = resolver.resolve_image("https://example.com/a.png", None).await;
        assert_eq!(source.mime_type(), Some("image/webp"));
    }

    #[tokio::test]
    async fn fetch_failure_passes_url_through() {
        let failing = MediaResolver::new(Arc::new(FailingTransport));
        let source = failing.resolve_image("https://example.com/a.png", None).await;
        assert_eq!(
            source,
            MediaSource::Url {
                url: "https://example.com/a.png".to_string(),
                mime_type: None,
            }
        );

        let not_found = MediaResolver::new(Arc::new(FixedTransport {
            status: 404,
            content_type: None,
            body: b"missing".to_vec(),
        }));
        let source = not_found.resolve_image("https://example.com/b.png", None).await;
        assert!(matches!(source, MediaSource::Url { .. }));
    }

    #[tokio::test]
    async fn oversized_image_passes_url_through() {
        let transport = Arc::new(FixedTransport {
            status: 200,
            content_type: Some("image/png"),
            body: [PNG_HEAD.as_slice(), &[0u8; 56]].concat(),
        });
        let capped = MediaResolver::new(transport.clone()).with_max_bytes(40);
        let source = capped.resolve_image("https://example.com/big.png", None).await;
        assert_eq!(
            source,
            MediaSource::Url {
                url: "https://example.com/big.png".to_string(),
                mime_type: None,
            }
        );

        let roomy = MediaResolver::new(transport).with_max_bytes(64);
        let source = roomy.resolve_image("https://example.com/big.png", None).await;
        assert!(matches!(source, MediaSource::Inline { ref mime_type, .. } if mime_type == "image/png"));
    }

    #[tokio::test]
    async fn declared_length_over_cap_skips_download() {
        struct Huge;

        #[async_trait]
        impl HttpTransport for Huge {
            async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
                Err(LLMError::transport("not used"))
            }

            async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
                Ok(HttpStreamResponse {
                    status: 200,
                    headers: HashMap::from([("Content-Length".to_string(), "1073741824".to_string())]),
                    body: Box::pin(futures_util::stream::pending()),
                })
            }
        }

        let resolver = MediaResolver::new(Arc::new(Huge));
        let source = resolver.resolve_image("https://example.com/huge.jpg", None).await;
        assert!(matches!(source, MediaSource::Url { .. }));
    }

    #[tokio::test]
    async fn data_urls_and_raw_base64_are_inline() {
        let resolver = MediaResolver::offline();
        let source = resolver.resolve_image("data:image/gif;base64,R0lGOD", None).await;
        assert_eq!(source.mime_type(), Some("image/gif"));

        let raw = general_purpose::STANDARD.encode([PNG_HEAD.as_slice(), &[0u8; 8]].concat());
        let source = resolver.resolve_image(&raw, None).await;
        assert_eq!(source.mime_type(), Some("image/png"));

        let source = resolver.resolve_image("bm90IGFuIGltYWdl", None).await;
        assert_eq!(source.mime_type(), Some(DEFAULT_IMAGE_MIME));
    }

    #[test]
    fn references_fall_back_to_defaults() {
        let audio = resolve_reference("https://cdn.example.com/clip", None, DEFAULT_AUDIO_MIME);
        assert_eq!(audio.mime_type(), Some("audio/mp3"));
        let video = resolve_reference("https://cdn.example.com/v.webm?sig=1", None, DEFAULT_VIDEO_MIME);
        assert_eq!(video.mime_type(), Some("video/webm"));
        let file = resolve_reference("JVBERi0x", None, DEFAULT_FILE_MIME);
        assert!(matches!(file, MediaSource::Inline { ref mime_type, .. } if mime_type == "application/pdf"));
    }
}
