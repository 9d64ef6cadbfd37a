//! Request façade: credential selection, decryption, client construction, tool binding,
//! message translation and dispatch for one canonical request.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncWrite;
use tracing::{debug, info};

use crate::bridge::{ChunkStream, bridge, write_sse};
use crate::config::{ConfigSnapshot, ConfigStore, DEFAULT_ENVIRONMENT, RouterSettings};
use crate::error::{LLMError, RouteStage};
use crate::http::reqwest::{ReqwestTransportFactory, default_dyn_transport};
use crate::http::{DynTransportFactory, TransportOptions};
use crate::pool::CredentialPool;
use crate::provider::{AdapterRegistry, ChatBackend, DynBackendAdapter};
use crate::schema::{BackendMessage, BackendRole, GenerationOptions};
use crate::secret::{DynSecretCodec, decrypt_credential, process_codec};
use crate::translate::{
    MediaResolver, bind_tools, from_backend_message, to_backend_messages, usage_of,
};
use crate::types::{CHAT_COMPLETION_OBJECT, ChatCompletionResponse, ChatRequest, Usage};

/// Routes canonical requests to backends.
///
/// One backend client is built per request from a freshly selected and decrypted
/// credential. The router is cheap to share behind an `Arc`.
pub struct ProviderRouter {
    registry: AdapterRegistry,
    pool: CredentialPool,
    codec: DynSecretCodec,
    environment: String,
    transports: DynTransportFactory,
    media: MediaResolver,
}

/// Everything prepared for one request up to dispatch.
struct Prepared {
    provider: &'static str,
    client: Box<dyn ChatBackend>,
    messages: Vec<BackendMessage>,
}

impl ProviderRouter {
    pub fn builder(store: Arc<ConfigStore>) -> ProviderRouterBuilder {
        ProviderRouterBuilder::new(store)
    }

    /// Loads configuration from `settings.config_root` and uses the process secret codec,
    /// reqwest transports and the default adapters.
    pub fn from_settings(settings: &RouterSettings) -> Result<Self, LLMError> {
        let store = Arc::new(ConfigStore::load(settings.config_root.clone())?);
        Self::builder(store)
            .environment(settings.environment.clone())
            .build()
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Re-reads the configuration directory and publishes it for later requests.
    pub fn reload_config(&self) -> Result<Arc<ConfigSnapshot>, LLMError> {
        self.pool.store().reload()
    }

    /// Non-streaming completion.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletionResponse, LLMError> {
        let Prepared {
            provider,
            client,
            messages,
        } = self.prepare(request).await?;

        let reply = client
            .generate(messages)
            .await
            .map_err(|err| err.in_stage(RouteStage::Dispatch))?;
        debug!(provider, "dispatched");

        if !matches!(reply.role, BackendRole::Assistant) {
            return Err(LLMError::BackendApi {
                provider,
                status: 200,
                code: None,
                kind: None,
                message: format!("reply has unexpected role {:?}", reply.role),
            }
            .in_stage(RouteStage::TranslateResponse));
        }
        let usage = usage_of(&reply).unwrap_or_else(|| {
            info!(provider, model = %request.model, "backend reported no usage, using zeros");
            Usage::default()
        });
        let now = Utc::now();
        let response = ChatCompletionResponse {
            id: format!("{provider}-{}", now.timestamp_nanos_opt().unwrap_or_default()),
            object: CHAT_COMPLETION_OBJECT.to_string(),
            created: now.timestamp(),
            model: request.model.clone(),
            choices: vec![from_backend_message(reply, 0)],
            usage,
        };
        debug!(provider, id = %response.id, "response translated");
        Ok(response)
    }

    /// Streaming completion. Errors before the stream opens are returned directly; later
    /// errors arrive as the last stream item.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream, LLMError> {
        let Prepared {
            provider,
            client,
            messages,
        } = self.prepare(request).await?;

        let stream = client
            .stream(messages)
            .await
            .map_err(|err| err.in_stage(RouteStage::Dispatch))?;
        debug!(provider, "stream opened");
        Ok(bridge(stream, request.model.clone(), &format!("{provider}-stream")))
    }

    /// Serves `request` according to its `stream` flag.
    ///
    /// Non-streaming requests return the response. Streaming requests write SSE frames to
    /// `sink`, ending with `data: [DONE]`, and return `None`.
    ///
    /// # Errors
    ///
    /// A streaming request without a sink is a [`LLMError::Validation`] error. A stream
    /// that fails after output began still ends with the `[DONE]` frame and then returns
    /// the error.
    pub async fn create_chat_completion<W>(
        &self,
        request: &ChatRequest,
        sink: Option<&mut W>,
    ) -> Result<Option<ChatCompletionResponse>, LLMError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        if !request.stream {
            return self.chat(request).await.map(Some);
        }
        let sink = sink.ok_or_else(|| LLMError::Validation {
            message: "stream requested without an output sink".to_string(),
        })?;
        let chunks = self.stream_chat(request).await?;
        let written = write_sse(chunks, sink).await?;
        debug!(provider = %request.provider, frames = written, "stream drained");
        Ok(None)
    }

    async fn prepare(&self, request: &ChatRequest) -> Result<Prepared, LLMError> {
        if request.model.trim().is_empty() {
            return Err(LLMError::Validation {
                message: "model is required".to_string(),
            });
        }
        let adapter: DynBackendAdapter = self.registry.get(&request.provider)?;
        let provider = adapter.provider();
        let backend = adapter.config_backend();

        let credential = self
            .pool
            .select_credential(backend, &self.environment)
            .map_err(|err| err.in_stage(RouteStage::SelectCredential))?;
        if !credential.supports_model(&request.model) {
            debug!(
                credential = %credential.name,
                model = %request.model,
                "model not listed for credential"
            );
        }

        let credential = decrypt_credential(self.codec.as_ref(), &credential)
            .map_err(|err| err.in_stage(RouteStage::Decrypt))?;
        debug!(provider, credential = %credential.name, "credential decrypted");

        let transport = self
            .transports
            .build(&TransportOptions::from_credential(&credential))
            .map_err(|err| err.in_stage(RouteStage::BuildClient))?;
        let options = GenerationOptions {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop.clone(),
        };
        let mut client = adapter
            .build_client(&credential, options, transport)
            .map_err(|err| err.in_stage(RouteStage::BuildClient))?;
        debug!(provider, client = client.name(), "client built");

        if let Some(mode) = bind_tools(client.as_mut(), &request.tools, request.tool_choice.as_ref())
            .map_err(|err| err.in_stage(RouteStage::BindTools))?
        {
            debug!(provider, ?mode, tools = request.tools.len(), "tools bound");
        }

        let messages = to_backend_messages(&request.messages, &self.media)
            .await
            .map_err(|err| err.in_stage(RouteStage::TranslateMessages))?;

        Ok(Prepared {
            provider,
            client,
            messages,
        })
    }
}

impl fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("registry", &self.registry)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ProviderRouter`]. Unset parts fall back to the defaults used in
/// production: every registered adapter, the process secret codec, the `development`
/// environment and reqwest transports.
pub struct ProviderRouterBuilder {
    store: Arc<ConfigStore>,
    registry: Option<AdapterRegistry>,
    codec: Option<DynSecretCodec>,
    environment: Option<String>,
    transports: Option<DynTransportFactory>,
    media: Option<MediaResolver>,
}

impl ProviderRouterBuilder {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self {
            store,
            registry: None,
            codec: None,
            environment: None,
            transports: None,
            media: None,
        }
    }

    pub fn registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn codec(mut self, codec: DynSecretCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn transport_factory(mut self, transports: DynTransportFactory) -> Self {
        self.transports = Some(transports);
        self
    }

    pub fn media_resolver(mut self, media: MediaResolver) -> Self {
        self.media = Some(media);
        self
    }

    /// # Errors
    ///
    /// [`LLMError::KeyInit`] when no codec was given and the process key is missing;
    /// [`LLMError::Transport`] when the default HTTP client cannot be built.
    pub fn build(self) -> Result<ProviderRouter, LLMError> {
        let codec = match self.codec {
            Some(codec) => codec,
            None => process_codec()?,
        };
        let transports: DynTransportFactory = match self.transports {
            Some(transports) => transports,
            None => Arc::new(ReqwestTransportFactory::new()?),
        };
        let media = match self.media {
            Some(media) => media,
            None => MediaResolver::new(default_dyn_transport()?),
        };
        Ok(ProviderRouter {
            registry: self.registry.unwrap_or_else(AdapterRegistry::with_defaults),
            pool: CredentialPool::new(self.store),
            codec,
            environment: self
                .environment
                .filter(|environment| !environment.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            transports,
            media,
        })
    }
}
