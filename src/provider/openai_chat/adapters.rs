use crate::config::Credential;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::{BackendAdapter, ChatBackend};
use crate::schema::GenerationOptions;

use super::provider::OpenAiChatClient;

/// Azure OpenAI 默认 API 版本
pub const AZURE_DEFAULT_API_VERSION: &str = "2024-06-01";

/// Azure OpenAI 适配器 凭证来自 `azure.yaml`
#[derive(Debug, Clone, Copy, Default)]
pub struct AzureOpenAiAdapter;

impl BackendAdapter for AzureOpenAiAdapter {
    fn provider(&self) -> &'static str {
        "azure"
    }

    fn config_backend(&self) -> &'static str {
        "azure"
    }

    fn build_client(
        &self,
        credential: &Credential,
        options: GenerationOptions,
        transport: DynHttpTransport,
    ) -> Result<Box<dyn ChatBackend>, LLMError> {
        let api_key = require_api_key(self.provider(), credential)?;
        let endpoint = require_endpoint(self.provider(), credential)?;
        let deployment = credential
            .deployment_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(&options.model);
        if deployment.is_empty() {
            return Err(client_error(
                self.provider(),
                format!("credential {} has no deployment and request has no model", credential.name),
            ));
        }
        let api_version = credential
            .api_version
            .as_deref()
            .filter(|version| !version.trim().is_empty())
            .unwrap_or(AZURE_DEFAULT_API_VERSION);

        let url = azure_chat_url(endpoint, deployment, api_version);
        let client = OpenAiChatClient::new(transport, self.provider(), url, options)
            .with_header("api-key", api_key);
        Ok(Box::new(client))
    }
}

fn azure_chat_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        endpoint.trim_end_matches('/'),
        urlencoding::encode(deployment),
        urlencoding::encode(api_version)
    )
}

/// OpenAI 兼容后端适配器 例如 DeepSeek 凭证来自 `openai_compatible.yaml`
#[derive(Debug, Clone, Copy)]
pub struct CompatibleAdapter {
    provider: &'static str,
}

impl CompatibleAdapter {
    /// 以指定 provider 标识注册
    pub fn new(provider: &'static str) -> Self {
        Self { provider }
    }
}

impl BackendAdapter for CompatibleAdapter {
    fn provider(&self) -> &'static str {
        self.provider
    }

    fn config_backend(&self) -> &'static str {
        "openai_compatible"
    }

    fn build_client(
        &self,
        credential: &Credential,
        options: GenerationOptions,
        transport: DynHttpTransport,
    ) -> Result<Box<dyn ChatBackend>, LLMError> {
        let api_key = require_api_key(self.provider, credential)?;
        let endpoint = require_endpoint(self.provider, credential)?;
        let client = OpenAiChatClient::new(transport, self.provider, compatible_chat_url(endpoint), options)
            .with_header("Authorization", format!("Bearer {api_key}"));
        Ok(Box::new(client))
    }
}

fn compatible_chat_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

fn client_error(provider: &'static str, message: impl Into<String>) -> LLMError {
    LLMError::BackendClient {
        provider,
        message: message.into(),
    }
}

fn require_api_key<'a>(provider: &'static str, credential: &'a Credential) -> Result<&'a str, LLMError> {
    credential
        .secret
        .api_key()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| client_error(provider, format!("credential {} has no api_key", credential.name)))
}

fn require_endpoint<'a>(provider: &'static str, credential: &'a Credential) -> Result<&'a str, LLMError> {
    credential
        .endpoint
        .as_deref()
        .filter(|endpoint| !endpoint.trim().is_empty())
        .ok_or_else(|| client_error(provider, format!("credential {} has no endpoint", credential.name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn azure_url_uses_deployment_and_version() {
        assert_eq!(
            azure_chat_url("https://res.openai.azure.com/", "gpt 4o", "2024-06-01"),
            "https://res.openai.azure.com/openai/deployments/gpt%204o/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn compatible_url_does_not_double_v1() {
        assert_eq!(
            compatible_chat_url("https://api.deepseek.com"),
            "https://api.deepseek.com/v1/chat/completions"
        );
        assert_eq!(
            compatible_chat_url("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
    }
}
