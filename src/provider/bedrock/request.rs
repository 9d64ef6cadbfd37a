use serde_json::{Map, Value, json};
use tracing::warn;

use crate::provider::BoundTools;
use crate::schema::{BackendMessage, BackendPart, BackendRole, GenerationOptions, MediaSource};

/// Builds a Converse / ConverseStream request body.
///
/// System messages move to the top-level `system` list. Tool results become `toolResult`
/// blocks in a user turn, and consecutive turns with the same role are merged because
/// Converse requires strict user/assistant alternation.
pub(crate) fn build_converse_body(
    messages: &[BackendMessage],
    options: &GenerationOptions,
    tools: &BoundTools,
) -> Value {
    let mut system = Vec::new();
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for message in messages {
        let (role, blocks) = match &message.role {
            BackendRole::System => {
                system.extend(message_text_blocks(message));
                continue;
            }
            BackendRole::Tool => ("user", vec![tool_result_block(message)]),
            BackendRole::Assistant => ("assistant", content_blocks(message)),
            BackendRole::User => ("user", content_blocks(message)),
            BackendRole::Other(role) => {
                warn!(role = %role, "bedrock has no such role, sending as user");
                ("user", content_blocks(message))
            }
        };
        if blocks.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    let mut body = Map::new();
    body.insert(
        "messages".to_string(),
        Value::Array(
            turns
                .into_iter()
                .map(|(role, content)| json!({"role": role, "content": content}))
                .collect(),
        ),
    );
    if !system.is_empty() {
        body.insert("system".to_string(), Value::Array(system));
    }

    let mut inference = Map::new();
    if let Some(max_tokens) = options.max_tokens {
        inference.insert("maxTokens".to_string(), Value::from(max_tokens));
    }
    if let Some(temperature) = options.temperature {
        inference.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = options.top_p {
        inference.insert("topP".to_string(), Value::from(top_p));
    }
    if !options.stop.is_empty() {
        inference.insert("stopSequences".to_string(), json!(options.stop));
    }
    if !inference.is_empty() {
        body.insert("inferenceConfig".to_string(), Value::Object(inference));
    }

    if !tools.tools.is_empty() {
        let specs: Vec<Value> = tools
            .tools
            .iter()
            .map(|tool| {
                let mut spec = Map::new();
                spec.insert("name".to_string(), Value::String(tool.name.clone()));
                if let Some(description) = &tool.description {
                    spec.insert("description".to_string(), Value::String(description.clone()));
                }
                let schema = tool
                    .parameters
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                spec.insert("inputSchema".to_string(), json!({"json": schema}));
                json!({"toolSpec": Value::Object(spec)})
            })
            .collect();
        let choice = if tools.forced {
            json!({"any": {}})
        } else {
            json!({"auto": {}})
        };
        body.insert(
            "toolConfig".to_string(),
            json!({"tools": specs, "toolChoice": choice}),
        );
    }

    Value::Object(body)
}

fn message_text_blocks(message: &BackendMessage) -> Vec<Value> {
    if message.parts.is_empty() {
        return text_block(&message.content).into_iter().collect();
    }
    message
        .parts
        .iter()
        .filter_map(|part| match part {
            BackendPart::Text(text) => text_block(text),
            _ => None,
        })
        .collect()
}

fn text_block(text: &str) -> Option<Value> {
    (!text.is_empty()).then(|| json!({"text": text}))
}

fn content_blocks(message: &BackendMessage) -> Vec<Value> {
    let mut blocks: Vec<Value> = if message.parts.is_empty() {
        text_block(&message.content).into_iter().collect()
    } else {
        message.parts.iter().filter_map(part_block).collect()
    };
    for call in &message.tool_calls {
        let input = match serde_json::from_str::<Value>(&call.arguments) {
            Ok(value @ Value::Object(_)) => value,
            _ if call.arguments.trim().is_empty() => json!({}),
            _ => {
                warn!(tool = %call.name, "tool call arguments are not a JSON object, sending empty input");
                json!({})
            }
        };
        blocks.push(json!({
            "toolUse": {"toolUseId": call.id, "name": call.name, "input": input}
        }));
    }
    blocks
}

fn tool_result_block(message: &BackendMessage) -> Value {
    let text = if message.parts.is_empty() {
        message.content.clone()
    } else {
        message
            .parts
            .iter()
            .filter_map(|part| match part {
                BackendPart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    json!({
        "toolResult": {
            "toolUseId": message.tool_call_id.clone().unwrap_or_default(),
            "content": [{"text": text}]
        }
    })
}

fn part_block(part: &BackendPart) -> Option<Value> {
    match part {
        BackendPart::Text(text) => text_block(text),
        BackendPart::Image(MediaSource::Inline { data, mime_type }) => Some(json!({
            "image": {"format": media_format(mime_type), "source": {"bytes": data}}
        })),
        BackendPart::Video(MediaSource::Inline { data, mime_type }) => Some(json!({
            "video": {"format": media_format(mime_type), "source": {"bytes": data}}
        })),
        BackendPart::Video(MediaSource::Url { url, .. }) if url.starts_with("s3://") => Some(json!({
            "video": {"format": media_format(part_mime(part)), "source": {"s3Location": {"uri": url}}}
        })),
        BackendPart::File {
            source: MediaSource::Inline { data, mime_type },
            name,
        } => Some(json!({
            "document": {
                "format": document_format(mime_type),
                "name": document_name(name),
                "source": {"bytes": data}
            }
        })),
        other => {
            let url = match other {
                BackendPart::Image(source)
                | BackendPart::Audio(source)
                | BackendPart::Video(source)
                | BackendPart::File { source, .. } => source.to_url(),
                BackendPart::Text(_) => return None,
            };
            warn!(kind = part_kind(other), "bedrock cannot accept this media inline, sending reference as text");
            Some(json!({"text": format!("[{}: {}]", part_kind(other), url)}))
        }
    }
}

fn part_kind(part: &BackendPart) -> &'static str {
    match part {
        BackendPart::Text(_) => "text",
        BackendPart::Image(_) => "image",
        BackendPart::Audio(_) => "audio",
        BackendPart::Video(_) => "video",
        BackendPart::File { .. } => "file",
    }
}

fn part_mime(part: &BackendPart) -> &str {
    match part {
        BackendPart::Image(source) | BackendPart::Audio(source) | BackendPart::Video(source) => {
            source.mime_type().unwrap_or("video/mp4")
        }
        BackendPart::File { source, .. } => source.mime_type().unwrap_or("application/pdf"),
        BackendPart::Text(_) => "text/plain",
    }
}

/// `image/jpeg` -> `jpeg`, `video/quicktime` -> `mov`.
fn media_format(mime_type: &str) -> &str {
    match mime_type.rsplit('/').next().unwrap_or(mime_type) {
        "jpg" => "jpeg",
        "quicktime" => "mov",
        "x-matroska" => "mkv",
        "x-flv" => "flv",
        other => other,
    }
}

fn document_format(mime_type: &str) -> &'static str {
    match mime_type {
        "text/csv" => "csv",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "text/html" => "html",
        "text/plain" => "txt",
        "text/markdown" => "md",
        _ => "pdf",
    }
}

/// Document names may only contain alphanumerics, whitespace, hyphens, parentheses and
/// square brackets.
fn document_name(name: &str) -> String {
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '(' | ')' | '[' | ']') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.trim().is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BackendToolCall, ToolInfo};

    #[test]
    fn splits_system_and_merges_tool_results_into_user_turn() {
        let mut assistant = BackendMessage::text(BackendRole::Assistant, "checking");
        assistant.tool_calls = vec![BackendToolCall {
            index: None,
            id: "tu_1".to_string(),
            kind: "function".to_string(),
            name: "weather".to_string(),
            arguments: "{\"city\":\"Oslo\"}".to_string(),
        }];
        let mut result = BackendMessage::text(BackendRole::Tool, "rainy");
        result.tool_call_id = Some("tu_1".to_string());
        let follow_up = BackendMessage::text(BackendRole::User, "and tomorrow?");

        let body = build_converse_body(
            &[
                BackendMessage::text(BackendRole::System, "be terse"),
                BackendMessage::text(BackendRole::User, "weather?"),
                assistant,
                result,
                follow_up,
            ],
            &GenerationOptions {
                model: "m".to_string(),
                max_tokens: Some(50),
                ..Default::default()
            },
            &BoundTools {
                tools: vec![ToolInfo {
                    name: "weather".to_string(),
                    description: None,
                    parameters: Some(json!({"type": "object"})),
                }],
                forced: true,
            },
        );

        assert_eq!(body["system"], json!([{"text": "be terse"}]));
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][1]["toolUse"]["input"]["city"], "Oslo");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["toolResult"]["toolUseId"], "tu_1");
        assert_eq!(messages[2]["content"][1]["text"], "and tomorrow?");
        assert_eq!(body["inferenceConfig"]["maxTokens"], 50);
        assert_eq!(body["toolConfig"]["toolChoice"], json!({"any": {}}));
        assert_eq!(
            body["toolConfig"]["tools"][0]["toolSpec"]["inputSchema"]["json"]["type"],
            "object"
        );
    }

    #[test]
    fn inline_media_becomes_blocks_and_urls_degrade_to_text() {
        let mut user = BackendMessage::new(BackendRole::User);
        user.parts = vec![
            BackendPart::Image(MediaSource::Inline {
                data: "AAAA".to_string(),
                mime_type: "image/png".to_string(),
            }),
            BackendPart::Image(MediaSource::Url {
                url: "https://example.com/x.png".to_string(),
                mime_type: None,
            }),
            BackendPart::File {
                source: MediaSource::Inline {
                    data: "JVBE".to_string(),
                    mime_type: "application/pdf".to_string(),
                },
                name: "report.v2.pdf".to_string(),
            },
        ];
        let body = build_converse_body(&[user], &GenerationOptions::default(), &BoundTools::default());
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["image"]["format"], "png");
        assert_eq!(content[0]["image"]["source"]["bytes"], "AAAA");
        assert_eq!(content[1]["text"], "[image: https://example.com/x.png]");
        assert_eq!(content[2]["document"]["format"], "pdf");
        assert_eq!(content[2]["document"]["name"], "report-v2");
        assert!(body.get("inferenceConfig").is_none());
        assert!(body.get("toolConfig").is_none());
    }
}
