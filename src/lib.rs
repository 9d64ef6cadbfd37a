//! LLM 多后端凭证路由与流式归一化
//!
//! 对外统一为 OpenAI 兼容的请求 响应与流式分块 后端包括 Azure OpenAI Bedrock 以及
//! OpenAI 兼容服务

pub mod bridge;
pub mod config;
pub mod error;
pub mod http;
pub mod pool;
pub mod provider;
pub mod router;
pub mod schema;
pub mod secret;
pub mod stream;
pub mod translate;
pub mod types;

pub use bridge::{ChunkStream, write_sse};
pub use config::{ConfigStore, Credential, RouterSettings};
pub use error::{LLMError, RouteStage};
pub use pool::CredentialPool;
pub use provider::{AdapterRegistry, BackendAdapter, BackendStream, ChatBackend};
pub use router::{ProviderRouter, ProviderRouterBuilder};
pub use secret::{AesGcmCodec, SecretCodec};
pub use types::*;
