use serde_json::Value;

use crate::error::LLMError;

use super::types::OpenAiErrorBody;

/// Maps a non-2xx OpenAI-wire response to [`LLMError::BackendApi`].
pub(crate) fn parse_openai_error(provider: &'static str, status: u16, body: &str) -> LLMError {
    let detail = serde_json::from_str::<OpenAiErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error);

    match detail {
        Some(detail) => LLMError::BackendApi {
            provider,
            status,
            code: detail.code.map(|code| match code {
                Value::String(code) => code,
                other => other.to_string(),
            }),
            kind: detail.kind,
            message: detail.message.unwrap_or_else(|| "unknown error".to_string()),
        },
        None => LLMError::BackendApi {
            provider,
            status,
            code: None,
            kind: None,
            message: if body.trim().is_empty() {
                format!("status {status}")
            } else {
                body.trim().to_string()
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_code_type_and_message() {
        let err = parse_openai_error(
            "azure",
            429,
            r#"{"error":{"message":"Rate limit reached","type":"requests","code":"429"}}"#,
        );
        match err {
            LLMError::BackendApi {
                provider,
                status,
                code,
                kind,
                message,
            } => {
                assert_eq!(provider, "azure");
                assert_eq!(status, 429);
                assert_eq!(code.as_deref(), Some("429"));
                assert_eq!(kind.as_deref(), Some("requests"));
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_raw_body() {
        let err = parse_openai_error("deepseek", 502, "bad gateway");
        assert!(err.to_string().contains("bad gateway"));
        assert!(matches!(err, LLMError::BackendApi { status: 502, code: None, .. }));
    }
}
