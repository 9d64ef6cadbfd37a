use tracing::warn;

use crate::error::LLMError;
use crate::provider::ChatBackend;
use crate::schema::ToolInfo;
use crate::types::{Tool, ToolChoice, ToolType};

/// How declared tools are bound to a backend client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolBindingMode {
    /// The model decides whether to call a tool.
    Normal,
    /// The model must call one of the tools.
    Forced,
}

impl ToolBindingMode {
    /// `"required"` and `"force"` (any case) select forced binding; every other value,
    /// including a named tool and an unset choice, binds normally.
    pub fn from_choice(choice: Option<&ToolChoice>) -> Self {
        match choice {
            Some(ToolChoice::Mode(mode))
                if mode.eq_ignore_ascii_case("required") || mode.eq_ignore_ascii_case("force") =>
            {
                Self::Forced
            }
            _ => Self::Normal,
        }
    }
}

/// Converts canonical tool definitions into backend tool descriptions.
///
/// Tools with a non-function type are treated as functions with a warning; tools without
/// a function definition cannot be bound.
pub fn to_tool_infos(tools: &[Tool]) -> Result<Vec<ToolInfo>, LLMError> {
    tools
        .iter()
        .enumerate()
        .map(|(position, tool)| {
            if let ToolType::Unknown(kind) = &tool.kind {
                warn!(kind = %kind, position, "unsupported tool type, binding as function");
            }
            let function = tool.function.as_ref().ok_or_else(|| LLMError::ToolBinding {
                message: format!("tool at position {position} has no function definition"),
            })?;
            Ok(ToolInfo {
                name: function.name.clone(),
                description: function.description.clone(),
                parameters: function.parameters.clone(),
            })
        })
        .collect()
}

/// Binds the request's tools to `client`. Does nothing when no tools are declared.
///
/// Returns the mode used, or `None` when binding was skipped.
pub fn bind_tools(
    client: &mut dyn ChatBackend,
    tools: &[Tool],
    choice: Option<&ToolChoice>,
) -> Result<Option<ToolBindingMode>, LLMError> {
    if tools.is_empty() {
        return Ok(None);
    }
    let infos = to_tool_infos(tools)?;
    let mode = ToolBindingMode::from_choice(choice);
    match mode {
        ToolBindingMode::Normal => client.bind_tools(infos)?,
        ToolBindingMode::Forced => client.bind_forced_tools(infos)?,
    }
    Ok(Some(mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BoxBackendStream;
    use crate::schema::BackendMessage;
    use crate::types::{FunctionDefinition, NamedToolChoice, ToolChoiceFunction};
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingBackend {
        bound: Vec<(Vec<String>, bool)>,
    }

    #[async_trait]
    impl ChatBackend for RecordingBackend {
        fn bind_tools(&mut self, tools: Vec<ToolInfo>) -> Result<(), LLMError> {
            self.bound.push((tools.into_iter().map(|tool| tool.name).collect(), false));
            Ok(())
        }

        fn bind_forced_tools(&mut self, tools: Vec<ToolInfo>) -> Result<(), LLMError> {
            self.bound.push((tools.into_iter().map(|tool| tool.name).collect(), true));
            Ok(())
        }

        async fn generate(&self, _messages: Vec<BackendMessage>) -> Result<BackendMessage, LLMError> {
            Err(LLMError::transport("not used"))
        }

        async fn stream(&self, _messages: Vec<BackendMessage>) -> Result<BoxBackendStream, LLMError> {
            Err(LLMError::transport("not used"))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn weather_tool() -> Tool {
        Tool {
            kind: ToolType::Function,
            function: Some(FunctionDefinition {
                name: "weather".to_string(),
                description: Some("current weather".to_string()),
                parameters: Some(json!({"type": "object", "properties": {"city": {"type": "string"}}})),
            }),
        }
    }

    #[test]
    fn choice_values_select_binding_mode() {
        let mode = |value: &str| ToolBindingMode::from_choice(Some(&ToolChoice::Mode(value.to_string())));
        assert_eq!(mode("required"), ToolBindingMode::Forced);
        assert_eq!(mode("FORCE"), ToolBindingMode::Forced);
        assert_eq!(mode("auto"), ToolBindingMode::Normal);
        assert_eq!(mode("none"), ToolBindingMode::Normal);
        assert_eq!(ToolBindingMode::from_choice(None), ToolBindingMode::Normal);

        let named = ToolChoice::Named(NamedToolChoice {
            kind: ToolType::Function,
            function: ToolChoiceFunction {
                name: "weather".to_string(),
            },
        });
        assert_eq!(ToolBindingMode::from_choice(Some(&named)), ToolBindingMode::Normal);
    }

    #[test]
    fn binding_is_skipped_without_tools() {
        let mut backend = RecordingBackend::default();
        let mode = bind_tools(&mut backend, &[], Some(&ToolChoice::Mode("required".to_string())))
            .expect("bind");
        assert_eq!(mode, None);
        assert!(backend.bound.is_empty());
    }

    #[test]
    fn forced_binding_carries_schema_and_coerces_unknown_type() {
        let mut odd = weather_tool();
        odd.kind = ToolType::Unknown("retrieval".to_string());
        let infos = to_tool_infos(&[weather_tool(), odd]).expect("infos");
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].parameters.as_ref().expect("schema")["properties"]["city"]["type"], "string");

        let mut backend = RecordingBackend::default();
        let mode = bind_tools(
            &mut backend,
            &[weather_tool()],
            Some(&ToolChoice::Mode("Required".to_string())),
        )
        .expect("bind");
        assert_eq!(mode, Some(ToolBindingMode::Forced));
        assert_eq!(backend.bound, vec![(vec!["weather".to_string()], true)]);
    }

    #[test]
    fn tool_without_function_fails_binding() {
        let tool = Tool {
            kind: ToolType::Function,
            function: None,
        };
        assert!(matches!(to_tool_infos(&[tool]), Err(LLMError::ToolBinding { .. })));
    }
}
