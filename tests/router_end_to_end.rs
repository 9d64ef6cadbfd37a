use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use kotoba_router::config::{BackendConfigFile, ConfigSnapshot, ConfigStore, Credential};
use kotoba_router::http::{
    DynHttpTransport, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport,
    SharedTransportFactory,
};
use kotoba_router::provider::{
    AdapterRegistry, BackendAdapter, BackendStream, BoxBackendStream, ChatBackend,
};
use kotoba_router::schema::{BackendMessage, BackendRole, GenerationOptions, ResponseMeta, TokenUsage, ToolInfo};
use kotoba_router::secret::{AesGcmCodec, DynSecretCodec, PlaintextCodec};
use kotoba_router::translate::MediaResolver;
use kotoba_router::types::{
    ChatCompletionStreamResponse, ChatRequest, FinishReason, FunctionDefinition, Message, Tool,
    ToolChoice, ToolType,
};
use kotoba_router::{LLMError, ProviderRouter};

/// What the stub backend saw for the last request.
#[derive(Debug, Default, Clone)]
struct Observed {
    api_key: Option<String>,
    model: String,
    forced_tools: Option<bool>,
    messages: Vec<BackendMessage>,
}

struct StubAdapter {
    observed: Arc<Mutex<Observed>>,
}

impl BackendAdapter for StubAdapter {
    fn provider(&self) -> &'static str {
        "x"
    }

    fn config_backend(&self) -> &'static str {
        "x"
    }

    fn build_client(
        &self,
        credential: &Credential,
        options: GenerationOptions,
        _transport: DynHttpTransport,
    ) -> Result<Box<dyn ChatBackend>, LLMError> {
        let mut observed = self.observed.lock().expect("lock");
        observed.api_key = credential.secret.api_key().map(str::to_string);
        observed.model = options.model;
        Ok(Box::new(StubBackend {
            observed: self.observed.clone(),
        }))
    }
}

struct StubBackend {
    observed: Arc<Mutex<Observed>>,
}

fn finished(reason: &str, usage: Option<TokenUsage>) -> BackendMessage {
    let mut message = BackendMessage::new(BackendRole::Assistant);
    message.response_meta = Some(ResponseMeta {
        finish_reason: Some(reason.to_string()),
        usage,
    });
    message
}

#[async_trait]
impl ChatBackend for StubBackend {
    fn bind_tools(&mut self, _tools: Vec<ToolInfo>) -> Result<(), LLMError> {
        self.observed.lock().expect("lock").forced_tools = Some(false);
        Ok(())
    }

    fn bind_forced_tools(&mut self, _tools: Vec<ToolInfo>) -> Result<(), LLMError> {
        self.observed.lock().expect("lock").forced_tools = Some(true);
        Ok(())
    }

    async fn generate(&self, messages: Vec<BackendMessage>) -> Result<BackendMessage, LLMError> {
        self.observed.lock().expect("lock").messages = messages;
        let mut reply = finished(
            "stop",
            Some(TokenUsage {
                prompt_tokens: 3,
                completion_tokens: 1,
                total_tokens: 4,
            }),
        );
        reply.content = "hello".to_string();
        Ok(reply)
    }

    async fn stream(&self, messages: Vec<BackendMessage>) -> Result<BoxBackendStream, LLMError> {
        self.observed.lock().expect("lock").messages = messages;
        Ok(Box::new(StubStream {
            queue: VecDeque::from([
                BackendMessage::text(BackendRole::Assistant, "hel"),
                BackendMessage::text(BackendRole::Assistant, "lo"),
                finished("stop", None),
            ]),
        }))
    }

    fn name(&self) -> &'static str {
        "x"
    }
}

struct StubStream {
    queue: VecDeque<BackendMessage>,
}

#[async_trait]
impl BackendStream for StubStream {
    async fn recv(&mut self) -> Result<Option<BackendMessage>, LLMError> {
        Ok(self.queue.pop_front())
    }

    fn close(&mut self) {
        self.queue.clear();
    }
}

struct NoNetwork;

#[async_trait]
impl HttpTransport for NoNetwork {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
        Err(LLMError::transport("offline"))
    }

    async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        Err(LLMError::transport("offline"))
    }
}

const STUB_CONFIG: &str = r#"
environments:
  development:
    credentials:
      - name: primary
        api_key: SECRET
        enabled: true
        weight: 1
        models: [m]
"#;

fn router_with(config: &str, codec: DynSecretCodec) -> (ProviderRouter, Arc<Mutex<Observed>>) {
    let file = BackendConfigFile::from_yaml(config).expect("config");
    let store = Arc::new(ConfigStore::new(ConfigSnapshot::default().with_backend("x", file)));
    router_over(store, codec)
}

fn router_over(store: Arc<ConfigStore>, codec: DynSecretCodec) -> (ProviderRouter, Arc<Mutex<Observed>>) {
    let observed = Arc::new(Mutex::new(Observed::default()));
    let registry = AdapterRegistry::with_defaults().register(Arc::new(StubAdapter {
        observed: observed.clone(),
    }));
    let router = ProviderRouter::builder(store)
        .registry(registry)
        .codec(codec)
        .transport_factory(Arc::new(SharedTransportFactory::new(Arc::new(NoNetwork))))
        .media_resolver(MediaResolver::offline())
        .build()
        .expect("router");
    (router, observed)
}

fn request(stream: bool) -> ChatRequest {
    ChatRequest {
        provider: "x".to_string(),
        model: "m".to_string(),
        messages: vec![Message::user("hi")],
        stream,
        ..Default::default()
    }
}

#[tokio::test]
async fn non_streaming_request_returns_canonical_completion() {
    let (router, observed) = router_with(STUB_CONFIG, Arc::new(PlaintextCodec));
    let response = router
        .create_chat_completion::<Vec<u8>>(&request(false), None)
        .await
        .expect("completion")
        .expect("response");

    assert_eq!(response.object, "chat.completion");
    assert!(response.id.starts_with("x-"));
    assert_eq!(response.model, "m");
    assert_eq!(response.choices.len(), 1);
    assert_eq!(response.choices[0].message.content.as_deref(), Some("hello"));
    assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));
    assert_eq!(response.usage.total_tokens, 4);

    let observed = observed.lock().expect("lock").clone();
    assert_eq!(observed.api_key.as_deref(), Some("SECRET"));
    assert_eq!(observed.model, "m");
    assert_eq!(observed.forced_tools, None);
    assert_eq!(observed.messages, vec![BackendMessage::text(BackendRole::User, "hi")]);
}

#[tokio::test]
async fn streaming_request_writes_sse_frames_and_done() {
    let (router, _observed) = router_with(STUB_CONFIG, Arc::new(PlaintextCodec));
    let mut sink = Vec::new();
    let response = router
        .create_chat_completion(&request(true), Some(&mut sink))
        .await
        .expect("stream");
    assert!(response.is_none());

    let text = String::from_utf8(sink).expect("utf8");
    assert!(text.ends_with("data: [DONE]\n\n"));
    let frames: Vec<&str> = text.split_terminator("\n\n").collect();
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[3], "data: [DONE]");

    let chunks: Vec<ChatCompletionStreamResponse> = frames[..3]
        .iter()
        .map(|frame| {
            let json = frame.strip_prefix("data: ").expect("data prefix");
            serde_json::from_str(json).expect("chunk json")
        })
        .collect();
    let with_content: Vec<_> = chunks
        .iter()
        .filter_map(|chunk| chunk.choices[0].delta.content.as_deref())
        .filter(|content| !content.is_empty())
        .collect();
    assert_eq!(with_content, vec!["hel", "lo"]);
    let finished: Vec<_> = chunks
        .iter()
        .filter(|chunk| chunk.choices[0].finish_reason.is_some())
        .collect();
    assert_eq!(finished.len(), 1);
    assert!(std::ptr::eq(finished[0], &chunks[2]));
    assert!(chunks.iter().all(|chunk| chunk.id == chunks[0].id));
    assert!(chunks[0].id.starts_with("x-stream-"));
    assert_eq!(chunks[0].object, "chat.completion.chunk");
}

#[tokio::test]
async fn stream_chat_exposes_chunks_directly() {
    let (router, _observed) = router_with(STUB_CONFIG, Arc::new(PlaintextCodec));
    let chunks: Vec<_> = router
        .stream_chat(&request(true))
        .await
        .expect("stream")
        .collect()
        .await;
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(Result::is_ok));
}

#[tokio::test]
async fn unsupported_provider_is_named_in_the_error() {
    let (router, _observed) = router_with(STUB_CONFIG, Arc::new(PlaintextCodec));
    let mut req = request(false);
    req.provider = "nope".to_string();
    let mut sink = Vec::new();
    let err = router
        .create_chat_completion(&req, Some(&mut sink))
        .await
        .err()
        .expect("should fail");
    assert!(err.to_string().contains("nope"));
    assert!(matches!(err, LLMError::UnsupportedProvider { .. }));
    assert!(sink.is_empty());
}

#[tokio::test]
async fn forced_tool_choice_binds_forced_for_both_paths() {
    let (router, observed) = router_with(STUB_CONFIG, Arc::new(PlaintextCodec));
    let mut req = request(false);
    req.tools = vec![Tool {
        kind: ToolType::Function,
        function: Some(FunctionDefinition {
            name: "lookup".to_string(),
            description: None,
            parameters: None,
        }),
    }];
    req.tool_choice = Some(ToolChoice::Mode("Force".to_string()));

    router.chat(&req).await.expect("chat");
    assert_eq!(observed.lock().expect("lock").forced_tools, Some(true));

    observed.lock().expect("lock").forced_tools = None;
    req.stream = true;
    let _ = router.stream_chat(&req).await.expect("stream");
    assert_eq!(observed.lock().expect("lock").forced_tools, Some(true));
}

#[tokio::test]
async fn encrypted_secrets_are_decrypted_per_request_without_touching_config() {
    let codec = AesGcmCodec::new(b"test key material");
    let ciphertext = codec.encrypt("sk-live").expect("encrypt");
    let file = BackendConfigFile::from_yaml(&STUB_CONFIG.replace("SECRET", &ciphertext)).expect("config");
    let store = Arc::new(ConfigStore::new(ConfigSnapshot::default().with_backend("x", file)));
    let (router, observed) = router_over(store.clone(), Arc::new(codec));

    router.chat(&request(false)).await.expect("chat");
    router.chat(&request(false)).await.expect("second chat");
    assert_eq!(observed.lock().expect("lock").api_key.as_deref(), Some("sk-live"));

    let snapshot = store.snapshot();
    let stored = &snapshot.credentials("x", "development").expect("credentials")[0];
    assert_eq!(stored.secret.api_key(), Some(ciphertext.as_str()));
}

#[tokio::test]
async fn all_disabled_credentials_fail_selection() {
    let config = STUB_CONFIG.replace("enabled: true", "enabled: false");
    let (router, _observed) = router_with(&config, Arc::new(PlaintextCodec));
    let err = router.chat(&request(false)).await.err().expect("should fail");
    assert!(matches!(err.root(), LLMError::NoEnabledCredential { .. }));
    assert!(err.to_string().starts_with("credential selection"));
}
