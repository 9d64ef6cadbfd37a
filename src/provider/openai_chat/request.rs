use serde_json::{Map, Value, json};

use crate::provider::BoundTools;
use crate::schema::{
    BackendMessage, BackendPart, BackendRole, BackendToolCall, GenerationOptions, MediaSource,
    ToolInfo,
};

pub(crate) fn build_openai_body(
    messages: &[BackendMessage],
    options: &GenerationOptions,
    tools: &BoundTools,
    stream: bool,
) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(options.model.clone()));
    body.insert(
        "messages".to_string(),
        Value::Array(messages.iter().map(convert_message).collect()),
    );
    if let Some(max_tokens) = options.max_tokens {
        body.insert("max_tokens".to_string(), Value::from(max_tokens));
    }
    if let Some(temperature) = options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = options.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }
    if !options.stop.is_empty() {
        body.insert("stop".to_string(), json!(options.stop));
    }
    if !tools.tools.is_empty() {
        body.insert(
            "tools".to_string(),
            Value::Array(tools.tools.iter().map(convert_tool).collect()),
        );
        if tools.forced {
            body.insert("tool_choice".to_string(), Value::String("required".to_string()));
        }
    }
    body.insert("stream".to_string(), Value::Bool(stream));
    Value::Object(body)
}

pub(crate) fn role_str(role: &BackendRole) -> &str {
    match role {
        BackendRole::System => "system",
        BackendRole::User => "user",
        BackendRole::Assistant => "assistant",
        BackendRole::Tool => "tool",
        BackendRole::Other(value) => value,
    }
}

fn convert_message(message: &BackendMessage) -> Value {
    let mut obj = Map::new();
    obj.insert("role".to_string(), Value::String(role_str(&message.role).to_string()));
    if let Some(name) = &message.name {
        obj.insert("name".to_string(), Value::String(name.clone()));
    }

    let content = if !message.parts.is_empty() {
        Value::Array(message.parts.iter().map(convert_part).collect())
    } else if message.content.is_empty() && !message.tool_calls.is_empty() {
        Value::Null
    } else {
        Value::String(message.content.clone())
    };
    obj.insert("content".to_string(), content);

    if let Some(call_id) = &message.tool_call_id {
        obj.insert("tool_call_id".to_string(), Value::String(call_id.clone()));
    }
    if !message.tool_calls.is_empty() {
        obj.insert(
            "tool_calls".to_string(),
            Value::Array(message.tool_calls.iter().map(convert_tool_call).collect()),
        );
    }
    Value::Object(obj)
}

fn convert_part(part: &BackendPart) -> Value {
    match part {
        BackendPart::Text(text) => json!({"type": "text", "text": text}),
        BackendPart::Image(source) => json!({
            "type": "image_url",
            "image_url": {"url": source.to_url()}
        }),
        BackendPart::Audio(MediaSource::Inline { data, mime_type }) => json!({
            "type": "input_audio",
            "input_audio": {"data": data, "format": audio_format(mime_type)}
        }),
        BackendPart::Audio(source) => json!({
            "type": "audio_url",
            "audio_url": {"url": source.to_url()}
        }),
        BackendPart::Video(source) => json!({
            "type": "video_url",
            "video_url": {"url": source.to_url()}
        }),
        BackendPart::File { source, name } => json!({
            "type": "file",
            "file": {"filename": name, "file_data": source.to_url()}
        }),
    }
}

/// `input_audio.format` expects a short name such as `mp3` or `wav`.
fn audio_format(mime_type: &str) -> &str {
    match mime_type.rsplit('/').next().unwrap_or(mime_type) {
        "mpeg" | "mp3" => "mp3",
        "x-wav" | "wave" | "wav" => "wav",
        other => other,
    }
}

fn convert_tool_call(call: &BackendToolCall) -> Value {
    json!({
        "id": call.id,
        "type": call.kind,
        "function": {"name": call.name, "arguments": call.arguments}
    })
}

fn convert_tool(tool: &ToolInfo) -> Value {
    let mut function = Map::new();
    function.insert("name".to_string(), Value::String(tool.name.clone()));
    if let Some(description) = &tool.description {
        function.insert("description".to_string(), Value::String(description.clone()));
    }
    function.insert(
        "parameters".to_string(),
        tool.parameters
            .clone()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    );
    json!({"type": "function", "function": Value::Object(function)})
}
