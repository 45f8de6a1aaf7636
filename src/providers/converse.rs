//! Bedrock Converse request/response transforms.
//!
//! Converse is the unified chat API: one request shape across model
//! families, with family-specific knobs tunneled through
//! `additionalModelRequestFields`.

use crate::error::AppError;
use crate::models::openai::{
    ChatChoice, ChatCompletionResponse, FunctionCall, ResponseBlock, ResponseMessage, ToolCall,
    Usage,
};
use crate::providers::family::ModelFamily;
use crate::target::ProviderTarget;
use crate::transform::{FieldRule, FieldSpec, FunctionConfig, TransformError};
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

/// Declarative canonical → Converse mapping.
pub fn chat_request_config() -> &'static FunctionConfig {
    static CONFIG: OnceLock<FunctionConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        FunctionConfig::new(vec![
            (
                "messages",
                FieldRule::Fanout(vec![
                    FieldRule::Transform {
                        spec: FieldSpec::at("system"),
                        f: system_blocks,
                    },
                    FieldRule::Transform {
                        spec: FieldSpec::at("messages").required(),
                        f: converse_messages,
                    },
                ]),
            ),
            (
                "tools",
                FieldRule::Transform {
                    spec: FieldSpec::at("toolConfig.tools"),
                    f: converse_tools,
                },
            ),
            (
                "tool_choice",
                FieldRule::Transform {
                    spec: FieldSpec::at("toolConfig.toolChoice"),
                    f: converse_tool_choice,
                },
            ),
            (
                "max_tokens",
                FieldRule::Copy(FieldSpec::at("inferenceConfig.maxTokens").min(1.0)),
            ),
            (
                "max_completion_tokens",
                FieldRule::Copy(FieldSpec::at("inferenceConfig.maxTokens").min(1.0)),
            ),
            (
                "temperature",
                FieldRule::Copy(FieldSpec::at("inferenceConfig.temperature").range(0.0, 1.0)),
            ),
            (
                "top_p",
                FieldRule::Copy(FieldSpec::at("inferenceConfig.topP").range(0.0, 1.0)),
            ),
            (
                "stop",
                FieldRule::Transform {
                    spec: FieldSpec::at("inferenceConfig.stopSequences"),
                    f: stop_sequences,
                },
            ),
            (
                "model",
                FieldRule::Transform {
                    spec: FieldSpec::at("additionalModelRequestFields"),
                    f: additional_model_fields,
                },
            ),
            (
                "guardrailConfig",
                FieldRule::Copy(FieldSpec::at("guardrailConfig")),
            ),
        ])
    })
}

fn family_of(body: &Value, target: &ProviderTarget) -> Option<ModelFamily> {
    body.get("model")
        .and_then(Value::as_str)
        .or(target.model.as_deref())
        .and_then(ModelFamily::detect)
}

/// System and developer messages become the Converse `system` block list.
fn system_blocks(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    let messages = body["messages"]
        .as_array()
        .ok_or_else(|| TransformError::Invalid("messages must be an array".to_string()))?;

    let mut blocks = Vec::new();
    for message in messages {
        let role = message["role"].as_str().unwrap_or("user");
        if role != "system" && role != "developer" {
            continue;
        }
        let mut cached = false;
        match &message["content"] {
            Value::String(text) => blocks.push(json!({ "text": text })),
            Value::Array(parts) => {
                for part in parts {
                    if let Some(text) = part["text"].as_str() {
                        blocks.push(json!({ "text": text }));
                    }
                    cached |= part.get("cache_control").is_some();
                }
            }
            _ => {}
        }
        if cached {
            blocks.push(cache_point());
        }
    }

    if blocks.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Array(blocks))
    }
}

fn cache_point() -> Value {
    json!({ "cachePoint": { "type": "default" } })
}

/// Non-system messages become the Converse `messages` list.
///
/// Tool messages are folded into user turns carrying `toolResult` blocks, and
/// adjacent same-role user/tool messages coalesce into one turn.
fn converse_messages(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    let messages = body["messages"]
        .as_array()
        .ok_or_else(|| TransformError::Invalid("messages must be an array".to_string()))?;

    let mut out: Vec<Value> = Vec::new();
    for message in messages {
        let role = message["role"].as_str().unwrap_or("user");
        if role == "system" || role == "developer" {
            continue;
        }

        let (converse_role, content) = match role {
            "tool" => ("user", vec![tool_result_block(message)?]),
            "assistant" => ("assistant", assistant_blocks(message)?),
            _ => ("user", content_blocks(&message["content"])?),
        };

        match out.last_mut() {
            Some(last) if last["role"] == converse_role => {
                let existing = last["content"]
                    .as_array_mut()
                    .expect("converse content is always an array");
                existing.extend(content);
            }
            _ => out.push(json!({ "role": converse_role, "content": content })),
        }
    }

    Ok(Value::Array(out))
}

fn tool_result_block(message: &Value) -> Result<Value, TransformError> {
    let tool_use_id = message["tool_call_id"].as_str().ok_or_else(|| {
        TransformError::Invalid("tool message requires tool_call_id".to_string())
    })?;

    // Tool-result content is always an array, never a bare string; empty
    // content stays an empty array.
    let content = match &message["content"] {
        Value::String(text) if text.is_empty() => Vec::new(),
        Value::String(text) => vec![json!({ "text": text })],
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part["text"].as_str())
            .map(|text| json!({ "text": text }))
            .collect(),
        _ => Vec::new(),
    };

    Ok(json!({
        "toolResult": {
            "toolUseId": tool_use_id,
            "content": content,
        }
    }))
}

fn assistant_blocks(message: &Value) -> Result<Vec<Value>, TransformError> {
    let mut blocks = content_blocks(&message["content"])?;

    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let id = call["id"].as_str().unwrap_or_default();
            let name = call["function"]["name"].as_str().unwrap_or_default();
            let arguments = call["function"]["arguments"].as_str().unwrap_or("{}");
            let input: Value = if arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(arguments).map_err(|e| {
                    TransformError::Invalid(format!(
                        "tool call '{}' has invalid JSON arguments: {}",
                        name, e
                    ))
                })?
            };
            blocks.push(json!({
                "toolUse": { "toolUseId": id, "name": name, "input": input }
            }));
        }
    }

    Ok(blocks)
}

/// Map canonical content (string or block list) to Converse content blocks.
/// A block carrying `cache_control` is followed by a cache-point marker.
fn content_blocks(content: &Value) -> Result<Vec<Value>, TransformError> {
    let mut blocks = Vec::new();
    match content {
        // An empty string (tool-call-only assistant turns) maps to no blocks
        Value::String(text) if text.is_empty() => {}
        Value::String(text) => blocks.push(json!({ "text": text })),
        Value::Array(parts) => {
            for part in parts {
                let block = match part["type"].as_str().unwrap_or("text") {
                    "text" => json!({ "text": part["text"].as_str().unwrap_or_default() }),
                    "thinking" => {
                        let mut reasoning = json!({
                            "reasoningText": { "text": part["thinking"].as_str().unwrap_or_default() }
                        });
                        if let Some(signature) = part["signature"].as_str() {
                            reasoning["reasoningText"]["signature"] = json!(signature);
                        }
                        json!({ "reasoningContent": reasoning })
                    }
                    "redacted_thinking" => json!({
                        "reasoningContent": {
                            "redactedContent": part["data"].as_str().unwrap_or_default()
                        }
                    }),
                    "image_url" => image_block(part)?,
                    "file" => document_block(part)?,
                    other => {
                        return Err(TransformError::Invalid(format!(
                            "unsupported content block type '{}'",
                            other
                        )))
                    }
                };
                blocks.push(block);
                if part.get("cache_control").is_some() {
                    blocks.push(cache_point());
                }
            }
        }
        Value::Null => {}
        _ => {
            return Err(TransformError::Invalid(
                "message content must be a string or an array of blocks".to_string(),
            ))
        }
    }
    Ok(blocks)
}

fn image_block(part: &Value) -> Result<Value, TransformError> {
    let url = part["image_url"]["url"].as_str().ok_or_else(|| {
        TransformError::Invalid("image_url block requires image_url.url".to_string())
    })?;
    let (mime, data) = parse_data_url(url)?;

    if let Some(format) = image_format(&mime) {
        Ok(json!({
            "image": { "format": format, "source": { "bytes": data } }
        }))
    } else if let Some(format) = document_format_for_mime(&mime) {
        Ok(json!({
            "document": {
                "format": format,
                "name": "document",
                "source": { "bytes": data }
            }
        }))
    } else {
        Err(TransformError::Invalid(format!(
            "unsupported media type '{}'",
            mime
        )))
    }
}

fn document_block(part: &Value) -> Result<Value, TransformError> {
    let file = &part["file"];
    let filename = file["filename"].as_str().unwrap_or("document");
    let format = document_format_for_name(filename);
    let name = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);

    if let Some(uri) = file["file_url"].as_str() {
        Ok(json!({
            "document": {
                "format": format,
                "name": name,
                "source": { "s3Location": { "uri": uri } }
            }
        }))
    } else if let Some(data) = file["file_data"].as_str() {
        Ok(json!({
            "document": {
                "format": format,
                "name": name,
                "source": { "bytes": data }
            }
        }))
    } else {
        Err(TransformError::Invalid(
            "file block requires file_url or file_data".to_string(),
        ))
    }
}

/// Split a `data:<mime>;base64,<payload>` URL, rejecting payloads that are
/// not valid base64 before they reach the provider.
fn parse_data_url(url: &str) -> Result<(String, String), TransformError> {
    use base64::Engine;

    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| TransformError::Invalid("only data: URLs are supported".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| TransformError::Invalid("malformed data: URL".to_string()))?;
    let mime = header.split(';').next().unwrap_or_default().to_string();

    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| TransformError::Invalid(format!("invalid base64 media payload: {}", e)))?;

    Ok((mime, payload.to_string()))
}

fn image_format(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpeg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn document_format_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "application/pdf" => Some("pdf"),
        "text/plain" => Some("txt"),
        "text/html" => Some("html"),
        "text/csv" => Some("csv"),
        "text/markdown" => Some("md"),
        "application/msword" => Some("doc"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some("docx"),
        "application/vnd.ms-excel" => Some("xls"),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some("xlsx"),
        _ => None,
    }
}

fn document_format_for_name(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext) {
        Some("pdf") => "pdf",
        Some("html") => "html",
        Some("csv") => "csv",
        Some("md") => "md",
        Some("doc") => "doc",
        Some("docx") => "docx",
        Some("xls") => "xls",
        Some("xlsx") => "xlsx",
        _ => "txt",
    }
}

/// Tools become `toolConfig.tools`, with a cache point after any cache-marked
/// tool on families that support prompt caching.
fn converse_tools(body: &Value, target: &ProviderTarget) -> Result<Value, TransformError> {
    let tools = body["tools"]
        .as_array()
        .ok_or_else(|| TransformError::Invalid("tools must be an array".to_string()))?;

    let cache_allowed = family_of(body, target)
        .map(|family| family.allows_cache_points())
        .unwrap_or(true);

    let mut out = Vec::new();
    for tool in tools {
        let function = &tool["function"];
        let mut spec = json!({
            "toolSpec": {
                "name": function["name"].as_str().unwrap_or_default(),
                "inputSchema": { "json": function["parameters"].clone() }
            }
        });
        if let Some(description) = function["description"].as_str() {
            spec["toolSpec"]["description"] = json!(description);
        }
        out.push(spec);
        if tool.get("cache_control").is_some() && cache_allowed {
            out.push(cache_point());
        }
    }

    Ok(Value::Array(out))
}

fn converse_tool_choice(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    match &body["tool_choice"] {
        Value::String(mode) => match mode.as_str() {
            "auto" => Ok(json!({ "auto": {} })),
            "required" => Ok(json!({ "any": {} })),
            // Converse cannot express "none"; omitting toolChoice is closest
            "none" => Ok(Value::Null),
            other => Err(TransformError::Invalid(format!(
                "unknown tool_choice '{}'",
                other
            ))),
        },
        Value::Object(choice) => {
            let name = choice
                .get("function")
                .and_then(|f| f["name"].as_str())
                .ok_or_else(|| {
                    TransformError::Invalid("tool_choice requires function.name".to_string())
                })?;
            Ok(json!({ "tool": { "name": name } }))
        }
        _ => Ok(Value::Null),
    }
}

fn stop_sequences(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    match &body["stop"] {
        Value::String(s) => Ok(json!([s])),
        Value::Array(v) => Ok(Value::Array(v.clone())),
        _ => Ok(Value::Null),
    }
}

/// Family-specific knobs tunnel through `additionalModelRequestFields`.
fn additional_model_fields(body: &Value, target: &ProviderTarget) -> Result<Value, TransformError> {
    let mut fields = Map::new();
    let family = family_of(body, target);

    match family {
        Some(ModelFamily::Anthropic) => {
            for key in ["top_k", "anthropic_version", "thinking"] {
                if let Some(value) = body.get(key) {
                    if !value.is_null() {
                        fields.insert(key.to_string(), value.clone());
                    }
                }
            }
        }
        Some(ModelFamily::CohereCommand) => {
            for key in ["frequency_penalty", "presence_penalty", "logit_bias", "n"] {
                if let Some(value) = body.get(key) {
                    if !value.is_null() {
                        fields.insert(key.to_string(), value.clone());
                    }
                }
            }
        }
        Some(ModelFamily::Ai21) => {
            if let Some(value) = body.get("frequency_penalty").filter(|v| !v.is_null()) {
                fields.insert("frequencyPenalty".to_string(), json!({ "scale": value }));
            }
            if let Some(value) = body.get("presence_penalty").filter(|v| !v.is_null()) {
                fields.insert("presencePenalty".to_string(), json!({ "scale": value }));
            }
            if let Some(value) = body.get("countPenalty").filter(|v| !v.is_null()) {
                fields.insert("countPenalty".to_string(), value.clone());
            }
        }
        Some(ModelFamily::Mistral) | Some(ModelFamily::Llama2) | Some(ModelFamily::Llama3) => {
            if let Some(value) = body.get("top_k").filter(|v| !v.is_null()) {
                fields.insert("top_k".to_string(), value.clone());
            }
        }
        _ => {}
    }

    if fields.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Object(fields))
    }
}

// ============================================================
// Response transform
// ============================================================

/// Convert a Converse response body to the canonical chat completion.
pub fn transform_chat_response(
    body: &Value,
    model: &str,
    strict: bool,
) -> Result<ChatCompletionResponse, AppError> {
    let content = body["output"]["message"]["content"]
        .as_array()
        .ok_or_else(|| {
            AppError::InvalidProviderResponse(
                "Converse response missing output.message.content".to_string(),
            )
        })?;

    let mut texts: Vec<String> = Vec::new();
    let mut blocks: Vec<ResponseBlock> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in content {
        if let Some(text) = block["text"].as_str() {
            texts.push(text.to_string());
            blocks.push(ResponseBlock::Text {
                text: text.to_string(),
            });
        } else if let Some(reasoning) = block.get("reasoningContent") {
            if let Some(reasoning_text) = reasoning.get("reasoningText") {
                blocks.push(ResponseBlock::Thinking {
                    thinking: reasoning_text["text"].as_str().unwrap_or_default().to_string(),
                    signature: reasoning_text["signature"].as_str().map(str::to_string),
                });
            } else if let Some(redacted) = reasoning["redactedContent"].as_str() {
                blocks.push(ResponseBlock::RedactedThinking {
                    data: redacted.to_string(),
                });
            }
        } else if let Some(tool_use) = block.get("toolUse") {
            tool_calls.push(ToolCall {
                id: tool_use["toolUseId"].as_str().unwrap_or_default().to_string(),
                tool_type: "function".to_string(),
                function: FunctionCall {
                    name: tool_use["name"].as_str().unwrap_or_default().to_string(),
                    arguments: serde_json::to_string(&tool_use["input"])
                        .unwrap_or_else(|_| "{}".to_string()),
                },
            });
        }
    }

    let usage = converse_usage(&body["usage"], strict);
    let has_structure = blocks.iter().any(|b| !matches!(b, ResponseBlock::Text { .. }));

    Ok(ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: Some(texts.join("\n")),
                content_blocks: if strict || !has_structure {
                    None
                } else {
                    Some(blocks)
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: body["stopReason"].as_str().map(str::to_string),
        }],
        usage: Some(usage),
    })
}

/// Map Converse usage counters to the canonical usage object. Cache fields
/// are only reported when nonzero. Under strict compliance they are ignored
/// entirely so `total = prompt + completion` still holds for the caller.
pub fn converse_usage(usage: &Value, strict: bool) -> Usage {
    let prompt = usage["inputTokens"].as_u64().unwrap_or(0);
    let completion = usage["outputTokens"].as_u64().unwrap_or(0);
    let (cache_read, cache_creation) = if strict {
        (None, None)
    } else {
        (
            usage["cacheReadInputTokens"].as_u64(),
            usage["cacheWriteInputTokens"].as_u64(),
        )
    };

    Usage::from_counts(prompt, completion, cache_read, cache_creation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    fn test_target() -> ProviderTarget {
        let mut headers = HeaderMap::new();
        headers.insert("x-bg-aws-region", HeaderValue::from_static("us-east-1"));
        headers.insert("x-bg-aws-access-key-id", HeaderValue::from_static("AKIA"));
        headers.insert(
            "x-bg-aws-secret-access-key",
            HeaderValue::from_static("secret"),
        );
        ProviderTarget::from_headers(&headers).unwrap()
    }

    #[test]
    fn test_basic_chat_request() {
        let body = json!({
            "model": "anthropic.claude-3-sonnet-20240229-v1:0",
            "messages": [
                {"role": "system", "content": "You are terse."},
                {"role": "user", "content": "Hi"}
            ],
            "max_tokens": 16,
            "temperature": 0.2
        });

        let out = chat_request_config().apply(&body, &test_target()).unwrap();
        assert_eq!(out["system"], json!([{"text": "You are terse."}]));
        assert_eq!(
            out["messages"],
            json!([{"role": "user", "content": [{"text": "Hi"}]}])
        );
        assert_eq!(out["inferenceConfig"]["maxTokens"], 16);
        assert_eq!(out["inferenceConfig"]["temperature"], 0.2);
        assert!(out.get("toolConfig").is_none());
        assert!(out.get("additionalModelRequestFields").is_none());
    }

    #[test]
    fn test_adjacent_user_and_tool_messages_coalesce() {
        let body = json!({
            "model": "anthropic.claude-3-sonnet-20240229-v1:0",
            "messages": [
                {"role": "user", "content": "First"},
                {"role": "tool", "tool_call_id": "t1", "content": "42"},
                {"role": "assistant", "content": "Done"}
            ]
        });

        let out = chat_request_config().apply(&body, &test_target()).unwrap();
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        // user text and the tool result merged into one user turn
        let first_content = messages[0]["content"].as_array().unwrap();
        assert_eq!(first_content.len(), 2);
        assert_eq!(first_content[0]["text"], "First");
        assert_eq!(first_content[1]["toolResult"]["toolUseId"], "t1");
        assert_eq!(
            first_content[1]["toolResult"]["content"],
            json!([{"text": "42"}])
        );
    }

    #[test]
    fn test_empty_tool_result_content_is_empty_array() {
        let message = json!({"role": "tool", "tool_call_id": "t9", "content": ""});
        let block = tool_result_block(&message).unwrap();
        assert_eq!(block["toolResult"]["content"], json!([]));
    }

    #[test]
    fn test_assistant_tool_calls_become_tool_use_blocks() {
        let body = json!({
            "model": "anthropic.claude-3-sonnet-20240229-v1:0",
            "messages": [
                {"role": "user", "content": "time?"},
                {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{
                        "id": "t1",
                        "type": "function",
                        "function": {"name": "get_time", "arguments": "{\"tz\":\"UTC\"}"}
                    }]
                }
            ]
        });

        let out = chat_request_config().apply(&body, &test_target()).unwrap();
        let assistant = &out["messages"][1];
        assert_eq!(assistant["content"].as_array().unwrap().len(), 1);
        let tool_use = &assistant["content"][0]["toolUse"];
        assert_eq!(tool_use["toolUseId"], "t1");
        assert_eq!(tool_use["name"], "get_time");
        assert_eq!(tool_use["input"], json!({"tz": "UTC"}));
    }

    #[test]
    fn test_invalid_tool_arguments_rejected() {
        let message = json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{
                "id": "t1",
                "type": "function",
                "function": {"name": "f", "arguments": "{not json"}
            }]
        });
        assert!(assistant_blocks(&message).is_err());
    }

    #[test]
    fn test_cache_control_inserts_cache_point() {
        let content = json!([
            {"type": "text", "text": "Context", "cache_control": {"type": "ephemeral"}},
            {"type": "text", "text": "Question"}
        ]);
        let blocks = content_blocks(&content).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1], cache_point());
    }

    #[test]
    fn test_image_data_url() {
        let part = json!({
            "type": "image_url",
            "image_url": {"url": "data:image/png;base64,iVBORw0KGgo="}
        });
        let block = image_block(&part).unwrap();
        assert_eq!(block["image"]["format"], "png");
        assert_eq!(block["image"]["source"]["bytes"], "iVBORw0KGgo=");
    }

    #[test]
    fn test_pdf_data_url_becomes_document() {
        let part = json!({
            "type": "image_url",
            "image_url": {"url": "data:application/pdf;base64,JVBERi0="}
        });
        let block = image_block(&part).unwrap();
        assert_eq!(block["document"]["format"], "pdf");
        assert_eq!(block["document"]["source"]["bytes"], "JVBERi0=");
    }

    #[test]
    fn test_file_url_becomes_s3_document() {
        let part = json!({
            "type": "file",
            "file": {"file_url": "s3://bucket/report.pdf", "filename": "report.pdf"}
        });
        let block = document_block(&part).unwrap();
        assert_eq!(
            block["document"]["source"]["s3Location"]["uri"],
            "s3://bucket/report.pdf"
        );
        assert_eq!(block["document"]["format"], "pdf");
        assert_eq!(block["document"]["name"], "report");
    }

    #[test]
    fn test_thinking_blocks_map_to_reasoning_content() {
        let content = json!([
            {"type": "thinking", "thinking": "hmm", "signature": "sig=="},
            {"type": "redacted_thinking", "data": "AAAA"}
        ]);
        let blocks = content_blocks(&content).unwrap();
        assert_eq!(blocks[0]["reasoningContent"]["reasoningText"]["text"], "hmm");
        assert_eq!(
            blocks[0]["reasoningContent"]["reasoningText"]["signature"],
            "sig=="
        );
        assert_eq!(blocks[1]["reasoningContent"]["redactedContent"], "AAAA");
    }

    #[test]
    fn test_tools_and_tool_choice() {
        let body = json!({
            "model": "anthropic.claude-3-sonnet-20240229-v1:0",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_time",
                    "description": "Current time",
                    "parameters": {"type": "object", "properties": {}}
                }
            }],
            "tool_choice": {"type": "function", "function": {"name": "get_time"}}
        });

        let out = chat_request_config().apply(&body, &test_target()).unwrap();
        let tool = &out["toolConfig"]["tools"][0]["toolSpec"];
        assert_eq!(tool["name"], "get_time");
        assert_eq!(tool["description"], "Current time");
        assert_eq!(tool["inputSchema"]["json"]["type"], "object");
        assert_eq!(out["toolConfig"]["toolChoice"], json!({"tool": {"name": "get_time"}}));
    }

    #[test]
    fn test_tool_choice_modes() {
        let target = test_target();
        let auto = json!({"tool_choice": "auto"});
        assert_eq!(
            converse_tool_choice(&auto, &target).unwrap(),
            json!({"auto": {}})
        );
        let required = json!({"tool_choice": "required"});
        assert_eq!(
            converse_tool_choice(&required, &target).unwrap(),
            json!({"any": {}})
        );
        let none = json!({"tool_choice": "none"});
        assert_eq!(converse_tool_choice(&none, &target).unwrap(), Value::Null);
    }

    #[test]
    fn test_cached_tools_skip_cache_point_for_titan() {
        let body = json!({
            "model": "amazon.titan-text-premier-v1:0",
            "tools": [{
                "type": "function",
                "function": {"name": "f", "parameters": {}},
                "cache_control": {"type": "ephemeral"}
            }]
        });
        let tools = converse_tools(&body, &test_target()).unwrap();
        assert_eq!(tools.as_array().unwrap().len(), 1);

        let body_anthropic = json!({
            "model": "anthropic.claude-3-sonnet-20240229-v1:0",
            "tools": body["tools"].clone()
        });
        let tools = converse_tools(&body_anthropic, &test_target()).unwrap();
        assert_eq!(tools.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_anthropic_knobs_in_additional_fields() {
        let body = json!({
            "model": "anthropic.claude-3-sonnet-20240229-v1:0",
            "messages": [{"role": "user", "content": "hi"}],
            "top_k": 40,
            "thinking": {"type": "enabled", "budget_tokens": 1024}
        });
        let out = chat_request_config().apply(&body, &test_target()).unwrap();
        assert_eq!(out["additionalModelRequestFields"]["top_k"], 40);
        assert_eq!(
            out["additionalModelRequestFields"]["thinking"]["budget_tokens"],
            1024
        );
    }

    #[test]
    fn test_scalar_fanout_single_inference_config() {
        let body = json!({
            "model": "anthropic.claude-3-sonnet-20240229-v1:0",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 100,
            "temperature": 0.5,
            "top_p": 0.9,
            "stop": "END"
        });
        let out = chat_request_config().apply(&body, &test_target()).unwrap();
        assert_eq!(
            out["inferenceConfig"],
            json!({
                "maxTokens": 100,
                "temperature": 0.5,
                "topP": 0.9,
                "stopSequences": ["END"]
            })
        );
    }

    #[test]
    fn test_response_transform_scenario_a() {
        let body = json!({
            "output": {"message": {"role": "assistant", "content": [{"text": "Hello."}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 7, "outputTokens": 2, "totalTokens": 9}
        });

        let response = transform_chat_response(
            &body,
            "anthropic.claude-3-sonnet-20240229-v1:0",
            false,
        )
        .unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hello."));
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("end_turn"));
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 7);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 9);
    }

    #[test]
    fn test_response_transform_joins_text_with_newline() {
        let body = json!({
            "output": {"message": {"content": [{"text": "a"}, {"text": "b"}]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 1, "outputTokens": 1}
        });
        let response = transform_chat_response(&body, "m", false).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("a\nb"));
    }

    #[test]
    fn test_response_transform_tool_use() {
        let body = json!({
            "output": {"message": {"content": [
                {"toolUse": {"toolUseId": "t1", "name": "get_time", "input": {"tz": "UTC"}}}
            ]}},
            "stopReason": "tool_use",
            "usage": {"inputTokens": 5, "outputTokens": 3}
        });
        let response = transform_chat_response(&body, "m", false).unwrap();
        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[0].function.name, "get_time");
        assert_eq!(
            serde_json::from_str::<Value>(&calls[0].function.arguments).unwrap(),
            json!({"tz": "UTC"})
        );
    }

    #[test]
    fn test_response_transform_strict_suppresses_blocks() {
        let body = json!({
            "output": {"message": {"content": [
                {"reasoningContent": {"reasoningText": {"text": "hmm"}}},
                {"text": "Answer"}
            ]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 1, "outputTokens": 1, "cacheReadInputTokens": 5}
        });

        let strict = transform_chat_response(&body, "m", true).unwrap();
        assert!(strict.choices[0].message.content_blocks.is_none());
        let usage = strict.usage.unwrap();
        assert!(usage.cache_read_input_tokens.is_none());

        let lax = transform_chat_response(&body, "m", false).unwrap();
        let blocks = lax.choices[0].message.content_blocks.as_ref().unwrap();
        assert!(matches!(blocks[0], ResponseBlock::Thinking { .. }));
        assert_eq!(lax.usage.unwrap().cache_read_input_tokens, Some(5));
    }

    #[test]
    fn test_round_trip_identity_text_only() {
        // Echo provider: the request transform's messages come back verbatim
        // as the response content; the canonical content must equal the
        // concatenation of the upstream message texts.
        let body = json!({
            "model": "anthropic.claude-3-sonnet-20240229-v1:0",
            "messages": [
                {"role": "user", "content": "One"},
                {"role": "assistant", "content": "Two"},
                {"role": "user", "content": "Three"}
            ]
        });
        let provider_request = chat_request_config().apply(&body, &test_target()).unwrap();

        // Echo every content block of every turn back as assistant output
        let echoed: Vec<Value> = provider_request["messages"]
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|m| m["content"].as_array().unwrap().clone())
            .collect();
        let provider_response = json!({
            "output": {"message": {"role": "assistant", "content": echoed}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 3, "outputTokens": 3}
        });

        let canonical = transform_chat_response(
            &provider_response,
            "anthropic.claude-3-sonnet-20240229-v1:0",
            false,
        )
        .unwrap();
        assert_eq!(
            canonical.choices[0].message.content.as_deref(),
            Some("One\nTwo\nThree")
        );
    }

    #[test]
    fn test_usage_arithmetic_with_cache_tokens() {
        let usage = converse_usage(
            &json!({
                "inputTokens": 10,
                "outputTokens": 5,
                "cacheReadInputTokens": 7,
                "cacheWriteInputTokens": 3
            }),
            false,
        );
        assert_eq!(usage.total_tokens, 25);
        assert_eq!(usage.cache_read_input_tokens, Some(7));
        assert_eq!(usage.cache_creation_input_tokens, Some(3));
    }

    #[test]
    fn test_malformed_response_rejected() {
        let body = json!({"unexpected": true});
        assert!(matches!(
            transform_chat_response(&body, "m", false),
            Err(AppError::InvalidProviderResponse(_))
        ));
    }
}
