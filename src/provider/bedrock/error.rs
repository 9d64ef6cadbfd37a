use crate::error::LLMError;

use super::types::BedrockErrorBody;

/// Maps a non-2xx Bedrock response to [`LLMError::BackendApi`].
///
/// The error type travels in the `x-amzn-ErrorType` header as `Name:namespace`.
pub(crate) fn parse_bedrock_error(status: u16, error_type: Option<&str>, body: &str) -> LLMError {
    let kind = error_type
        .and_then(|value| value.split(':').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let message = serde_json::from_str::<BedrockErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("status {status}")
            } else {
                body.trim().to_string()
            }
        });
    LLMError::BackendApi {
        provider: "bedrock",
        status,
        code: None,
        kind,
        message,
    }
}
