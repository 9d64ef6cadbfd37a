use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Credential;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::schema::{BackendMessage, GenerationOptions, ToolInfo};

pub mod bedrock;
pub mod openai_chat;

/// 后端客户端 每个请求按选中的凭证构建一次
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// 绑定工具 由模型决定是否调用
    fn bind_tools(&mut self, tools: Vec<ToolInfo>) -> Result<(), LLMError>;

    /// 绑定工具并要求模型必须调用其中之一
    fn bind_forced_tools(&mut self, tools: Vec<ToolInfo>) -> Result<(), LLMError>;

    /// 非流式生成
    async fn generate(&self, messages: Vec<BackendMessage>) -> Result<BackendMessage, LLMError>;

    /// 打开流式生成
    async fn stream(&self, messages: Vec<BackendMessage>) -> Result<BoxBackendStream, LLMError>;

    /// 供应商名称
    fn name(&self) -> &'static str;
}

/// 后端原生流 由 StreamBridge 独占读取
#[async_trait]
pub trait BackendStream: Send {
    /// 读取下一条增量消息 `Ok(None)` 表示流结束
    async fn recv(&mut self) -> Result<Option<BackendMessage>, LLMError>;

    /// 释放底层连接 可重复调用
    fn close(&mut self);
}

pub type BoxBackendStream = Box<dyn BackendStream>;

/// 客户端已绑定的工具 以及是否强制调用
#[derive(Debug, Clone, Default)]
pub(crate) struct BoundTools {
    pub(crate) tools: Vec<ToolInfo>,
    pub(crate) forced: bool,
}

impl BoundTools {
    /// 校验工具名后构建
    pub(crate) fn new(tools: Vec<ToolInfo>, forced: bool) -> Result<Self, LLMError> {
        if let Some(tool) = tools.iter().find(|tool| tool.name.trim().is_empty()) {
            return Err(LLMError::ToolBinding {
                message: format!("tool name must not be empty: {tool:?}"),
            });
        }
        Ok(Self { tools, forced })
    }
}

/// 后端适配器 负责用解密后的凭证构建客户端
pub trait BackendAdapter: Send + Sync {
    /// 请求中的 provider 标识 例如 `azure`
    fn provider(&self) -> &'static str;

    /// 凭证所在的配置文件名 例如 `openai_compatible`
    fn config_backend(&self) -> &'static str;

    /// 构建客户端 凭证已解密
    fn build_client(
        &self,
        credential: &Credential,
        options: GenerationOptions,
        transport: DynHttpTransport,
    ) -> Result<Box<dyn ChatBackend>, LLMError>;
}

/// 线程安全适配器
pub type DynBackendAdapter = Arc<dyn BackendAdapter>;

/// provider 标识到适配器的分发表
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, DynBackendAdapter>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 Azure OpenAI Bedrock 以及 OpenAI 兼容后端
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Arc::new(openai_chat::AzureOpenAiAdapter))
            .register(Arc::new(openai_chat::CompatibleAdapter::new("openai_compatible")))
            .register(Arc::new(openai_chat::CompatibleAdapter::new("deepseek")))
            .register(Arc::new(bedrock::BedrockAdapter))
    }

    /// 注册或覆盖一个适配器
    pub fn register(mut self, adapter: DynBackendAdapter) -> Self {
        self.adapters
            .insert(adapter.provider().to_ascii_lowercase(), adapter);
        self
    }

    /// 按 provider 查找 大小写不敏感
    pub fn get(&self, provider: &str) -> Result<DynBackendAdapter, LLMError> {
        self.adapters
            .get(&provider.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| LLMError::UnsupportedProvider {
                provider: provider.to_string(),
            })
    }

    /// 已注册的 provider 排序后返回
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_resolves_known_providers() {
        let registry = AdapterRegistry::with_defaults();
        assert_eq!(
            registry.providers(),
            vec!["azure", "bedrock", "deepseek", "openai_compatible"]
        );
        assert_eq!(registry.get("Azure").expect("azure").config_backend(), "azure");
        assert_eq!(
            registry.get("deepseek").expect("deepseek").config_backend(),
            "openai_compatible"
        );
    }

    #[test]
    fn unknown_provider_is_rejected_by_name() {
        let err = AdapterRegistry::with_defaults()
            .get("unsupported")
            .err()
            .expect("should fail");
        match err {
            LLMError::UnsupportedProvider { provider } => assert_eq!(provider, "unsupported"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
