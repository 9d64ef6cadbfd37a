use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tracing::debug;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpRequest};
use crate::provider::{BoundTools, BoxBackendStream, ChatBackend};
use crate::schema::{BackendMessage, GenerationOptions, ToolInfo};

use super::error::parse_bedrock_error;
use super::request::build_converse_body;
use super::response::map_converse_response;
use super::sigv4::SigV4Signer;
use super::stream::BedrockStream;
use super::types::ConverseResponse;

/// Bedrock Converse 客户端 每个请求使用 SigV4 签名
pub struct BedrockClient {
    pub(crate) transport: DynHttpTransport,
    pub(crate) signer: SigV4Signer,
    pub(crate) base_url: String,
    pub(crate) model: String,
    pub(crate) options: GenerationOptions,
    pub(crate) tools: BoundTools,
}

impl BedrockClient {
    /// 模型标识 部署 ID 优先于请求中的 model
    pub fn model(&self) -> &str {
        &self.model
    }

    /// `converse` 或 `converse-stream` 的完整地址
    pub fn operation_url(&self, operation: &str) -> String {
        format!(
            "{}/model/{}/{operation}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.model)
        )
    }

    fn signed_request(
        &self,
        operation: &str,
        messages: &[BackendMessage],
        accept: &str,
    ) -> Result<HttpRequest, LLMError> {
        let body = build_converse_body(messages, &self.options, &self.tools);
        let payload = serde_json::to_vec(&body).map_err(|err| LLMError::Serialization {
            message: err.to_string(),
        })?;
        let url = self.operation_url(operation);
        let headers = HashMap::from([
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), accept.to_string()),
        ]);
        let signed = self.signer.sign("POST", &url, &headers, &payload, Utc::now())?;
        Ok(HttpRequest::post_json(url, payload).with_headers(signed))
    }
}

#[async_trait]
impl ChatBackend for BedrockClient {
    fn bind_tools(&mut self, tools: Vec<ToolInfo>) -> Result<(), LLMError> {
        self.tools = BoundTools::new(tools, false)?;
        Ok(())
    }

    fn bind_forced_tools(&mut self, tools: Vec<ToolInfo>) -> Result<(), LLMError> {
        self.tools = BoundTools::new(tools, true)?;
        Ok(())
    }

    async fn generate(&self, messages: Vec<BackendMessage>) -> Result<BackendMessage, LLMError> {
        let request = self.signed_request("converse", &messages, "application/json")?;
        debug!(provider = "bedrock", model = %self.model, "dispatching converse");
        let response = self.transport.send(request).await?;
        let status = response.status;
        let error_type = response.header("x-amzn-ErrorType").map(str::to_string);
        let text = response.into_string()?;
        if !(200..300).contains(&status) {
            return Err(parse_bedrock_error(status, error_type.as_deref(), &text));
        }
        let parsed: ConverseResponse = serde_json::from_str(&text).map_err(|err| LLMError::BackendApi {
            provider: "bedrock",
            status,
            code: None,
            kind: None,
            message: format!("failed to parse response: {err}"),
        })?;
        map_converse_response(parsed)
    }

    async fn stream(&self, messages: Vec<BackendMessage>) -> Result<BoxBackendStream, LLMError> {
        let request = self.signed_request(
            "converse-stream",
            &messages,
            "application/vnd.amazon.eventstream",
        )?;
        debug!(provider = "bedrock", model = %self.model, "opening converse stream");
        let response = self.transport.send_stream(request).await?;
        if !(200..300).contains(&response.status) {
            let error_type = response
                .headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("x-amzn-ErrorType"))
                .map(|(_, value)| value.clone());
            let mut bytes = Vec::new();
            let mut body = response.body;
            while let Some(chunk) = body.next().await {
                bytes.extend_from_slice(&chunk?);
            }
            let text = String::from_utf8_lossy(&bytes);
            return Err(parse_bedrock_error(response.status, error_type.as_deref(), &text));
        }
        Ok(Box::new(BedrockStream::new(response.body)))
    }

    fn name(&self) -> &'static str {
        "bedrock"
    }
}
