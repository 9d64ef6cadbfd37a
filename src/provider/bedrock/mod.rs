mod error;
pub(crate) mod eventstream;
mod provider;
mod request;
mod response;
mod sigv4;
mod stream;
mod types;

pub use provider::BedrockClient;

use crate::config::{Credential, SecretMaterial};
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::{BackendAdapter, BoundTools, ChatBackend};
use crate::schema::GenerationOptions;

use sigv4::SigV4Signer;

/// Bedrock 适配器 凭证来自 `bedrock.yaml` 需要 access key 与 region
#[derive(Debug, Clone, Copy, Default)]
pub struct BedrockAdapter;

impl BackendAdapter for BedrockAdapter {
    fn provider(&self) -> &'static str {
        "bedrock"
    }

    fn config_backend(&self) -> &'static str {
        "bedrock"
    }

    fn build_client(
        &self,
        credential: &Credential,
        options: GenerationOptions,
        transport: DynHttpTransport,
    ) -> Result<Box<dyn ChatBackend>, LLMError> {
        let SecretMaterial::AccessKeyPair {
            access_key,
            secret_key,
            session_token,
        } = &credential.secret
        else {
            return Err(client_error(format!(
                "credential {} has no access_key/secret_key",
                credential.name
            )));
        };
        let region = credential
            .region
            .as_deref()
            .map(str::trim)
            .filter(|region| !region.is_empty())
            .ok_or_else(|| client_error(format!("credential {} has no region", credential.name)))?;
        let model = credential
            .deployment_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(&options.model)
            .to_string();
        if model.is_empty() {
            return Err(client_error(format!(
                "credential {} has no deployment and request has no model",
                credential.name
            )));
        }
        let base_url = credential
            .endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://bedrock-runtime.{region}.amazonaws.com"));

        Ok(Box::new(BedrockClient {
            transport,
            signer: SigV4Signer::new(
                access_key.clone(),
                secret_key.clone(),
                session_token.clone().filter(|token| !token.is_empty()),
                region,
            ),
            base_url,
            model,
            options,
            tools: BoundTools::default(),
        }))
    }
}

fn client_error(message: String) -> LLMError {
    LLMError::BackendClient {
        provider: "bedrock",
        message,
    }
}
