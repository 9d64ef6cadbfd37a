use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::{BoundTools, BoxBackendStream, ChatBackend};
use crate::schema::{BackendMessage, GenerationOptions, ToolInfo};

use super::error::parse_openai_error;
use super::request::build_openai_body;
use super::response::map_response;
use super::stream::OpenAiChatStream;
use super::types::OpenAiChatResponse;

/// Chat Completions 客户端 Azure 与 OpenAI 兼容后端共用 仅地址与鉴权头不同
pub struct OpenAiChatClient {
    pub(crate) transport: DynHttpTransport,
    pub(crate) provider: &'static str,
    pub(crate) endpoint: String,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) options: GenerationOptions,
    pub(crate) tools: BoundTools,
}

impl OpenAiChatClient {
    /// 创建客户端 `endpoint` 为完整的 chat/completions 地址
    pub fn new(
        transport: DynHttpTransport,
        provider: &'static str,
        endpoint: impl Into<String>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            transport,
            provider,
            endpoint: endpoint.into(),
            headers: HashMap::from([("Accept".to_string(), "application/json".to_string())]),
            options,
            tools: BoundTools::default(),
        }
    }

    /// 追加请求头 例如鉴权信息
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn try_parse(&self, text: &str) -> Result<OpenAiChatResponse, LLMError> {
        serde_json::from_str(text).map_err(|err| LLMError::BackendApi {
            provider: self.provider,
            status: 200,
            code: None,
            kind: None,
            message: format!("failed to parse response: {err}"),
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    fn bind_tools(&mut self, tools: Vec<ToolInfo>) -> Result<(), LLMError> {
        self.tools = BoundTools::new(tools, false)?;
        Ok(())
    }

    fn bind_forced_tools(&mut self, tools: Vec<ToolInfo>) -> Result<(), LLMError> {
        self.tools = BoundTools::new(tools, true)?;
        Ok(())
    }

    async fn generate(&self, messages: Vec<BackendMessage>) -> Result<BackendMessage, LLMError> {
        let body = build_openai_body(&messages, &self.options, &self.tools, false);
        debug!(provider = self.provider, endpoint = %self.endpoint, "dispatching chat completion");
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint.clone(),
            self.headers.clone(),
            &body,
        )
        .await?;
        let status = response.status;
        let text = response.into_string()?;
        if !(200..300).contains(&status) {
            return Err(parse_openai_error(self.provider, status, &text));
        }
        map_response(self.try_parse(&text)?, self.provider)
    }

    async fn stream(&self, messages: Vec<BackendMessage>) -> Result<BoxBackendStream, LLMError> {
        let body = build_openai_body(&messages, &self.options, &self.tools, true);
        debug!(provider = self.provider, endpoint = %self.endpoint, "opening chat completion stream");
        let mut headers = self.headers.clone();
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint.clone(),
            headers,
            &body,
        )
        .await?;
        if !(200..300).contains(&response.status) {
            let mut bytes = Vec::new();
            let mut body = response.body;
            while let Some(chunk) = body.next().await {
                bytes.extend_from_slice(&chunk?);
            }
            let text = String::from_utf8_lossy(&bytes);
            return Err(parse_openai_error(self.provider, response.status, &text));
        }
        Ok(Box::new(OpenAiChatStream::new(response.body, self.provider)))
    }

    fn name(&self) -> &'static str {
        self.provider
    }
}
