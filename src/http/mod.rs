use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;

use crate::config::Credential;
use crate::error::LLMError;

/// HTTP methods used by backends and media fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Minimal HTTP request shared by every backend.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request with a JSON body and `Content-Type: application/json`.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_router::http::{HttpMethod, HttpRequest};
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.method, HttpMethod::Post);
    /// assert_eq!(request.header("content-type"), Some("application/json"));
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(body),
            timeout: None,
        }
    }

    /// Builds a body-less GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Adds or replaces one header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Merges `headers` into the request, overwriting duplicates.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Decodes the body as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Transport`] when the body is not valid UTF-8.
    pub fn into_string(self) -> Result<String, LLMError> {
        String::from_utf8(self.body).map_err(|err| LLMError::transport(err.to_string()))
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Response whose body arrives incrementally.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

impl HttpStreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Body stream returned by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LLMError>> + Send>>;

/// Decouples backends from the concrete HTTP client.
///
/// # Examples
///
/// ```
/// # use async_trait::async_trait;
/// # use kotoba_router::http::{HttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};
/// # use kotoba_router::error::LLMError;
/// # use futures_util::stream;
/// struct MemoryTransport;
///
/// #[async_trait]
/// impl HttpTransport for MemoryTransport {
///     async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
///         Ok(HttpResponse { status: 200, headers: request.headers, body: b"ok".to_vec() })
///     }
///     async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
///         Ok(HttpStreamResponse { status: 200, headers: request.headers, body: Box::pin(stream::empty()) })
///     }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let response = MemoryTransport.send(HttpRequest::get("https://example.com/a.png")).await.unwrap();
/// assert!(response.is_success());
/// # });
/// ```
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves once the full body is buffered.
    ///
    /// # Errors
    ///
    /// Network failures map to [`LLMError::Transport`].
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError>;

    /// Sends a request and returns as soon as the response head arrives.
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// Per-credential transport settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    pub timeout: Option<Duration>,
    pub proxy: Option<String>,
}

impl TransportOptions {
    pub fn from_credential(credential: &Credential) -> Self {
        Self {
            timeout: credential.timeout(),
            proxy: credential
                .proxy
                .as_ref()
                .filter(|proxy| !proxy.trim().is_empty())
                .cloned(),
        }
    }
}

/// Builds a transport for one request from the selected credential's settings.
pub trait TransportFactory: Send + Sync {
    fn build(&self, options: &TransportOptions) -> Result<DynHttpTransport, LLMError>;
}

/// Thread-safe handle to a transport factory.
pub type DynTransportFactory = Arc<dyn TransportFactory>;

/// Factory that ignores options and always hands out the same transport.
pub struct SharedTransportFactory {
    transport: DynHttpTransport,
}

impl SharedTransportFactory {
    pub fn new(transport: DynHttpTransport) -> Self {
        Self { transport }
    }
}

impl TransportFactory for SharedTransportFactory {
    fn build(&self, _options: &TransportOptions) -> Result<DynHttpTransport, LLMError> {
        Ok(self.transport.clone())
    }
}

fn encode_json<T: Serialize>(body: &T) -> Result<Vec<u8>, LLMError> {
    serde_json::to_vec(body).map_err(|err| LLMError::Serialization {
        message: format!("failed to serialize request: {err}"),
    })
}

/// Serializes `body`, attaches `headers` and POSTs it.
///
/// # Errors
///
/// Returns [`LLMError::Serialization`] if the body cannot be encoded, otherwise whatever
/// [`HttpTransport::send`] returns.
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
) -> Result<HttpResponse, LLMError> {
    let request = HttpRequest::post_json(url, encode_json(body)?).with_headers(headers);
    transport.send(request).await
}

/// Streaming counterpart of [`post_json_with_headers`].
pub async fn post_json_stream_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
) -> Result<HttpStreamResponse, LLMError> {
    let request = HttpRequest::post_json(url, encode_json(body)?).with_headers(headers);
    transport.send_stream(request).await
}

pub mod reqwest;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser;

    struct PanicTransport;

    #[async_trait]
    impl HttpTransport for PanicTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
            panic!("send should not be called");
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            panic!("send_stream should not be called");
        }
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            Err(ser::Error::custom("intentional failure"))
        }
    }

    #[tokio::test]
    async fn serialization_failure_is_reported_before_sending() {
        let result =
            post_json_with_headers(&PanicTransport, "http://example.com", HashMap::new(), &Unserializable)
                .await;
        match result {
            Err(LLMError::Serialization { message }) => {
                assert!(message.contains("failed to serialize request"), "{message}");
            }
            Ok(_) => panic!("expected serialization error"),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn header_lookup_ignores_case_and_with_headers_merges() {
        let request = HttpRequest::post_json("http://example.com", Vec::new())
            .with_headers(HashMap::from([("api-key".to_string(), "k".to_string())]));
        assert_eq!(request.header("API-KEY"), Some("k"));
        assert_eq!(request.header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn transport_options_skip_blank_proxy() {
        let credential: Credential = serde_json::from_value(serde_json::json!({
            "name": "a", "api_key": "k", "timeout": 12, "proxy": "  "
        }))
        .expect("credential");
        let options = TransportOptions::from_credential(&credential);
        assert_eq!(options.timeout, Some(Duration::from_secs(12)));
        assert_eq!(options.proxy, None);
    }
}
