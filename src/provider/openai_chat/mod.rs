//! OpenAI Chat Completions wire backend shared by Azure OpenAI and OpenAI-compatible services.

mod adapters;
mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use adapters::{AZURE_DEFAULT_API_VERSION, AzureOpenAiAdapter, CompatibleAdapter};
pub use provider::OpenAiChatClient;
