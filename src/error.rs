use std::fmt;

use thiserror::Error;

/// Aggregates every failure mode exposed by the routing layer.
///
/// Errors raised before the backend is called are wrapped in [`LLMError::Stage`] by the
/// router so callers can tell which step of the request pipeline failed. Use
/// [`LLMError::root`] to match on the underlying variant.
#[derive(Debug, Error)]
pub enum LLMError {
    /// Missing or malformed configuration, including an unknown backend/environment pair.
    #[error("configuration error: {message}")]
    Config { message: String },
    /// Every credential configured for the backend/environment pair is disabled.
    #[error("no enabled credential for backend {backend} in environment {environment}")]
    NoEnabledCredential {
        /// Backend identifier such as `azure`.
        backend: String,
        /// Environment name such as `development`.
        environment: String,
    },
    /// Process-wide key material could not be initialised.
    #[error("secret key initialisation failed: {message}")]
    KeyInit { message: String },
    /// A credential secret could not be decrypted.
    #[error("secret decryption failed: {message}")]
    Decrypt { message: String },
    /// The request named a provider that has no registered adapter.
    #[error("unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },
    /// Building the backend client failed.
    #[error("failed to build {provider} client: {message}")]
    BackendClient {
        /// Backend identifier.
        provider: &'static str,
        /// Human-readable reason.
        message: String,
    },
    /// Tool definitions could not be converted or bound to the backend client.
    #[error("tool binding failed: {message}")]
    ToolBinding { message: String },
    /// The backend rejected the call.
    #[error("{provider} API error (status {status}): {message}")]
    BackendApi {
        /// Backend identifier.
        provider: &'static str,
        /// HTTP status returned by the backend.
        status: u16,
        /// Backend-specific error code, if reported.
        code: Option<String>,
        /// Backend-specific error type, if reported.
        kind: Option<String>,
        /// Error message returned by the backend.
        message: String,
    },
    /// Receiving from an open backend stream failed.
    #[error("{provider} stream receive failed: {message}")]
    StreamTransport {
        /// Backend identifier.
        provider: &'static str,
        /// Reason reported by the transport or decoder.
        message: String,
    },
    /// A payload could not be encoded for the wire.
    #[error("serialization error: {message}")]
    Serialization { message: String },
    /// Represents transport-layer or networking failures.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Signals validation failures in the request payload.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Wraps an error with the pipeline step that produced it.
    #[error("{stage}: {source}")]
    Stage {
        /// Step that failed.
        stage: RouteStage,
        /// Underlying error.
        #[source]
        source: Box<LLMError>,
    },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_router::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Config`] from a textual description.
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::StreamTransport`] for the given backend.
    pub fn stream<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::StreamTransport {
            provider,
            message: message.into(),
        }
    }

    /// Re-tags a failure raised while reading an already open stream.
    ///
    /// [`LLMError::StreamTransport`] passes through unchanged; anything else becomes one
    /// for `provider`, keeping the original message.
    pub fn into_stream(self, provider: &'static str) -> Self {
        match self {
            stream @ Self::StreamTransport { .. } => stream,
            Self::Transport { message } => Self::stream(provider, message),
            other => Self::stream(provider, other.to_string()),
        }
    }

    /// Wraps the error with the pipeline step that produced it.
    ///
    /// Already-staged errors are left untouched so the innermost stage wins.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_router::error::{LLMError, RouteStage};
    ///
    /// let err = LLMError::config("missing file").in_stage(RouteStage::SelectCredential);
    /// assert!(err.to_string().starts_with("credential selection"));
    /// assert!(matches!(err.root(), LLMError::Config { .. }));
    /// ```
    pub fn in_stage(self, stage: RouteStage) -> Self {
        match self {
            staged @ Self::Stage { .. } => staged,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, skipping any [`LLMError::Stage`] wrappers.
    pub fn root(&self) -> &LLMError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the stage recorded on this error, if any.
    pub fn stage(&self) -> Option<RouteStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Steps of the per-request routing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStage {
    SelectCredential,
    Decrypt,
    BuildClient,
    BindTools,
    TranslateMessages,
    Dispatch,
    TranslateResponse,
}

impl fmt::Display for RouteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SelectCredential => "credential selection",
            Self::Decrypt => "secret decryption",
            Self::BuildClient => "client construction",
            Self::BindTools => "tool binding",
            Self::TranslateMessages => "message translation",
            Self::Dispatch => "dispatch",
            Self::TranslateResponse => "response translation",
        };
        f.write_str(label)
    }
}
