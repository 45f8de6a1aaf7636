//! Bedrock InvokeModel request/response transforms.
//!
//! Invoke-only models (`command-text-v14`, `j2-*`, Titan text, Llama 2,
//! Mistral instruct, and Anthropic when addressed natively, e.g. for batch
//! `modelInput` rows) each take a family-specific payload. Chat history is
//! flattened into a single prompt string with model-specific control tokens.

use crate::error::AppError;
use crate::models::openai::{
    ChatChoice, ChatCompletionResponse, CompletionChoice, CompletionResponse, ResponseMessage,
    Usage,
};
use crate::providers::family::ModelFamily;
use crate::target::ProviderTarget;
use crate::transform::{FieldRule, FieldSpec, FunctionConfig, TransformError};
use serde_json::{json, Value};
use std::sync::OnceLock;

pub const INPUT_TOKEN_HEADER: &str = "x-amzn-bedrock-input-token-count";
pub const OUTPUT_TOKEN_HEADER: &str = "x-amzn-bedrock-output-token-count";

/// Build the invoke request body for a family.
pub fn chat_request_body(
    family: ModelFamily,
    body: &Value,
    target: &ProviderTarget,
) -> Result<Value, TransformError> {
    let config = match family {
        ModelFamily::Anthropic => anthropic_config(),
        ModelFamily::TitanText => titan_config(),
        ModelFamily::CohereCommand => cohere_config(),
        ModelFamily::Ai21 => ai21_config(),
        ModelFamily::Llama2 | ModelFamily::Llama3 => llama_config(),
        ModelFamily::Mistral => mistral_config(),
        other => {
            return Err(TransformError::Invalid(format!(
                "family '{}' has no invoke chat config",
                other.as_str()
            )))
        }
    };
    config.apply(body, target)
}

// ============================================================
// Per-family request configs
// ============================================================

fn anthropic_config() -> &'static FunctionConfig {
    static CONFIG: OnceLock<FunctionConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        FunctionConfig::new(vec![
            (
                "messages",
                FieldRule::Fanout(vec![
                    FieldRule::Transform {
                        spec: FieldSpec::at("system"),
                        f: anthropic_system,
                    },
                    FieldRule::Transform {
                        spec: FieldSpec::at("messages").required(),
                        f: anthropic_messages,
                    },
                ]),
            ),
            // Anthropic requires max_tokens; accept either canonical spelling
            // and fall back to 4096.
            (
                "max_tokens",
                FieldRule::Copy(
                    FieldSpec::at("max_tokens")
                        .default_fn(default_max_tokens)
                        .min(1.0),
                ),
            ),
            (
                "temperature",
                FieldRule::Copy(FieldSpec::at("temperature").range(0.0, 1.0)),
            ),
            ("top_p", FieldRule::Copy(FieldSpec::at("top_p").range(0.0, 1.0))),
            ("top_k", FieldRule::Copy(FieldSpec::at("top_k").min(0.0))),
            (
                "stop",
                FieldRule::Transform {
                    spec: FieldSpec::at("stop_sequences"),
                    f: stop_list,
                },
            ),
            (
                "tools",
                FieldRule::Transform {
                    spec: FieldSpec::at("tools"),
                    f: anthropic_tools,
                },
            ),
            (
                "tool_choice",
                FieldRule::Transform {
                    spec: FieldSpec::at("tool_choice"),
                    f: anthropic_tool_choice,
                },
            ),
            (
                "model",
                FieldRule::Const {
                    path: "anthropic_version",
                    value: json!("bedrock-2023-05-31"),
                },
            ),
        ])
    })
}

fn titan_config() -> &'static FunctionConfig {
    static CONFIG: OnceLock<FunctionConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        FunctionConfig::new(vec![
            (
                "messages",
                FieldRule::Transform {
                    spec: FieldSpec::at("inputText"),
                    f: prompt_text,
                },
            ),
            (
                "prompt",
                FieldRule::Transform {
                    spec: FieldSpec::at("inputText"),
                    f: prompt_text,
                },
            ),
            (
                "max_tokens",
                FieldRule::Copy(
                    FieldSpec::at("textGenerationConfig.maxTokenCount").default_value(json!(512)),
                ),
            ),
            (
                "temperature",
                FieldRule::Copy(FieldSpec::at("textGenerationConfig.temperature").range(0.0, 1.0)),
            ),
            (
                "top_p",
                FieldRule::Copy(FieldSpec::at("textGenerationConfig.topP").range(0.0, 1.0)),
            ),
            (
                "stop",
                FieldRule::Transform {
                    spec: FieldSpec::at("textGenerationConfig.stopSequences"),
                    f: stop_list,
                },
            ),
        ])
    })
}

fn cohere_config() -> &'static FunctionConfig {
    static CONFIG: OnceLock<FunctionConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        FunctionConfig::new(vec![
            (
                "messages",
                FieldRule::Transform {
                    spec: FieldSpec::at("prompt"),
                    f: prompt_text,
                },
            ),
            (
                "prompt",
                FieldRule::Transform {
                    spec: FieldSpec::at("prompt"),
                    f: prompt_text,
                },
            ),
            ("max_tokens", FieldRule::Copy(FieldSpec::at("max_tokens"))),
            (
                "temperature",
                FieldRule::Copy(FieldSpec::at("temperature").range(0.0, 5.0)),
            ),
            ("top_p", FieldRule::Copy(FieldSpec::at("p").range(0.0, 1.0))),
            ("top_k", FieldRule::Copy(FieldSpec::at("k").range(0.0, 500.0))),
            (
                "stop",
                FieldRule::Transform {
                    spec: FieldSpec::at("stop_sequences"),
                    f: stop_list,
                },
            ),
            ("n", FieldRule::Copy(FieldSpec::at("num_generations").range(1.0, 5.0))),
            (
                "frequency_penalty",
                FieldRule::Copy(FieldSpec::at("frequency_penalty").range(0.0, 1.0)),
            ),
            (
                "presence_penalty",
                FieldRule::Copy(FieldSpec::at("presence_penalty").range(0.0, 1.0)),
            ),
            ("logit_bias", FieldRule::Copy(FieldSpec::at("logit_bias"))),
        ])
    })
}

fn ai21_config() -> &'static FunctionConfig {
    static CONFIG: OnceLock<FunctionConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        FunctionConfig::new(vec![
            (
                "messages",
                FieldRule::Transform {
                    spec: FieldSpec::at("prompt"),
                    f: prompt_text,
                },
            ),
            (
                "prompt",
                FieldRule::Transform {
                    spec: FieldSpec::at("prompt"),
                    f: prompt_text,
                },
            ),
            ("max_tokens", FieldRule::Copy(FieldSpec::at("maxTokens"))),
            (
                "temperature",
                FieldRule::Copy(FieldSpec::at("temperature").range(0.0, 1.0)),
            ),
            ("top_p", FieldRule::Copy(FieldSpec::at("topP").range(0.0, 1.0))),
            (
                "stop",
                FieldRule::Transform {
                    spec: FieldSpec::at("stopSequences"),
                    f: stop_list,
                },
            ),
            (
                "frequency_penalty",
                FieldRule::Transform {
                    spec: FieldSpec::at("frequencyPenalty"),
                    f: penalty_scale_frequency,
                },
            ),
            (
                "presence_penalty",
                FieldRule::Transform {
                    spec: FieldSpec::at("presencePenalty"),
                    f: penalty_scale_presence,
                },
            ),
            ("countPenalty", FieldRule::Copy(FieldSpec::at("countPenalty"))),
        ])
    })
}

fn llama_config() -> &'static FunctionConfig {
    static CONFIG: OnceLock<FunctionConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        FunctionConfig::new(vec![
            (
                "messages",
                FieldRule::Transform {
                    spec: FieldSpec::at("prompt"),
                    f: prompt_text,
                },
            ),
            (
                "prompt",
                FieldRule::Transform {
                    spec: FieldSpec::at("prompt"),
                    f: prompt_text,
                },
            ),
            ("max_tokens", FieldRule::Copy(FieldSpec::at("max_gen_len"))),
            (
                "temperature",
                FieldRule::Copy(FieldSpec::at("temperature").range(0.0, 1.0)),
            ),
            ("top_p", FieldRule::Copy(FieldSpec::at("top_p").range(0.0, 1.0))),
        ])
    })
}

fn mistral_config() -> &'static FunctionConfig {
    static CONFIG: OnceLock<FunctionConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        FunctionConfig::new(vec![
            (
                "messages",
                FieldRule::Transform {
                    spec: FieldSpec::at("prompt"),
                    f: prompt_text,
                },
            ),
            (
                "prompt",
                FieldRule::Transform {
                    spec: FieldSpec::at("prompt"),
                    f: prompt_text,
                },
            ),
            ("max_tokens", FieldRule::Copy(FieldSpec::at("max_tokens"))),
            (
                "temperature",
                FieldRule::Copy(FieldSpec::at("temperature").range(0.0, 1.0)),
            ),
            ("top_p", FieldRule::Copy(FieldSpec::at("top_p").range(0.0, 1.0))),
            ("top_k", FieldRule::Copy(FieldSpec::at("top_k").min(0.0))),
            (
                "stop",
                FieldRule::Transform {
                    spec: FieldSpec::at("stop"),
                    f: stop_list,
                },
            ),
        ])
    })
}

// ============================================================
// Transform callbacks
// ============================================================

fn stop_list(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    match &body["stop"] {
        Value::String(s) => Ok(json!([s])),
        Value::Array(v) => Ok(Value::Array(v.clone())),
        _ => Ok(Value::Null),
    }
}

fn default_max_tokens(body: &Value, _target: &ProviderTarget) -> Value {
    body["max_completion_tokens"]
        .as_u64()
        .map(Value::from)
        .unwrap_or_else(|| json!(4096))
}

fn penalty_scale_frequency(body: &Value, _: &ProviderTarget) -> Result<Value, TransformError> {
    Ok(json!({ "scale": body["frequency_penalty"].clone() }))
}

fn penalty_scale_presence(body: &Value, _: &ProviderTarget) -> Result<Value, TransformError> {
    Ok(json!({ "scale": body["presence_penalty"].clone() }))
}

fn anthropic_system(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    let Some(messages) = body["messages"].as_array() else {
        return Ok(Value::Null);
    };
    let texts: Vec<String> = messages
        .iter()
        .filter(|m| matches!(m["role"].as_str(), Some("system") | Some("developer")))
        .map(|m| extract_text(&m["content"]))
        .collect();
    if texts.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(json!(texts.join("\n")))
    }
}

/// Canonical messages → Anthropic Messages format. Tool messages become
/// `tool_result` user turns; assistant `tool_calls` become `tool_use` blocks.
fn anthropic_messages(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    let messages = body["messages"]
        .as_array()
        .ok_or_else(|| TransformError::Invalid("messages must be an array".to_string()))?;

    let mut out = Vec::new();
    for message in messages {
        let role = message["role"].as_str().unwrap_or("user");
        match role {
            "system" | "developer" => continue,
            "tool" => {
                let tool_use_id = message["tool_call_id"].as_str().ok_or_else(|| {
                    TransformError::Invalid("tool message requires tool_call_id".to_string())
                })?;
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": extract_text(&message["content"]),
                    }]
                }));
            }
            "assistant" => {
                let mut content = anthropic_content(&message["content"])?;
                if let Some(calls) = message["tool_calls"].as_array() {
                    for call in calls {
                        let arguments = call["function"]["arguments"].as_str().unwrap_or("{}");
                        let input: Value =
                            serde_json::from_str(arguments).unwrap_or_else(|_| json!({}));
                        content.push(json!({
                            "type": "tool_use",
                            "id": call["id"].as_str().unwrap_or_default(),
                            "name": call["function"]["name"].as_str().unwrap_or_default(),
                            "input": input,
                        }));
                    }
                }
                out.push(json!({ "role": "assistant", "content": content }));
            }
            _ => {
                out.push(json!({
                    "role": "user",
                    "content": anthropic_content(&message["content"])?,
                }));
            }
        }
    }
    Ok(Value::Array(out))
}

fn anthropic_content(content: &Value) -> Result<Vec<Value>, TransformError> {
    match content {
        Value::String(text) => Ok(vec![json!({ "type": "text", "text": text })]),
        Value::Array(parts) => {
            let mut blocks = Vec::new();
            for part in parts {
                match part["type"].as_str().unwrap_or("text") {
                    "text" => blocks.push(json!({
                        "type": "text",
                        "text": part["text"].as_str().unwrap_or_default()
                    })),
                    "image_url" => {
                        let url = part["image_url"]["url"].as_str().unwrap_or_default();
                        let rest = url.strip_prefix("data:").ok_or_else(|| {
                            TransformError::Invalid("only data: URLs are supported".to_string())
                        })?;
                        let (header, payload) = rest.split_once(',').ok_or_else(|| {
                            TransformError::Invalid("malformed data: URL".to_string())
                        })?;
                        let media_type = header.split(';').next().unwrap_or_default();
                        blocks.push(json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": media_type,
                                "data": payload,
                            }
                        }));
                    }
                    "thinking" => blocks.push(json!({
                        "type": "thinking",
                        "thinking": part["thinking"].as_str().unwrap_or_default(),
                        "signature": part["signature"].as_str().unwrap_or_default(),
                    })),
                    "redacted_thinking" => blocks.push(json!({
                        "type": "redacted_thinking",
                        "data": part["data"].as_str().unwrap_or_default(),
                    })),
                    other => {
                        return Err(TransformError::Invalid(format!(
                            "unsupported content block type '{}'",
                            other
                        )))
                    }
                }
            }
            Ok(blocks)
        }
        Value::Null => Ok(Vec::new()),
        _ => Err(TransformError::Invalid(
            "message content must be a string or an array of blocks".to_string(),
        )),
    }
}

fn anthropic_tools(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    let tools = body["tools"]
        .as_array()
        .ok_or_else(|| TransformError::Invalid("tools must be an array".to_string()))?;
    let out: Vec<Value> = tools
        .iter()
        .map(|tool| {
            let function = &tool["function"];
            json!({
                "name": function["name"].as_str().unwrap_or_default(),
                "description": function["description"].as_str().unwrap_or_default(),
                "input_schema": function["parameters"].clone(),
            })
        })
        .collect();
    Ok(Value::Array(out))
}

fn anthropic_tool_choice(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    match &body["tool_choice"] {
        Value::String(mode) => match mode.as_str() {
            "auto" => Ok(json!({ "type": "auto" })),
            "required" => Ok(json!({ "type": "any" })),
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
            Ok(json!({ "type": "tool", "name": name }))
        }
        _ => Ok(Value::Null),
    }
}

fn extract_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

// ============================================================
// Prompt assembly
// ============================================================

/// Flatten chat history (or pass a raw `prompt` through) into the dialect
/// the target model expects.
fn prompt_text(body: &Value, target: &ProviderTarget) -> Result<Value, TransformError> {
    // Raw completions carry `prompt` directly
    if let Some(prompt) = body.get("prompt") {
        match prompt {
            Value::String(s) => return Ok(json!(render_raw_prompt(body, target, s))),
            Value::Array(parts) => {
                let joined = parts
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("\n");
                return Ok(json!(render_raw_prompt(body, target, &joined)));
            }
            _ => {}
        }
    }

    let messages = body["messages"]
        .as_array()
        .ok_or_else(|| TransformError::Invalid("messages must be an array".to_string()))?;

    let family = body
        .get("model")
        .and_then(Value::as_str)
        .or(target.model.as_deref())
        .and_then(ModelFamily::detect);

    let turns: Vec<(String, String)> = messages
        .iter()
        .map(|m| {
            (
                m["role"].as_str().unwrap_or("user").to_string(),
                extract_text(&m["content"]),
            )
        })
        .collect();

    let rendered = match family {
        Some(ModelFamily::Llama3) => render_llama3(&turns),
        Some(ModelFamily::Llama2) => render_llama2(&turns),
        Some(ModelFamily::Mistral) => render_mistral(&turns),
        Some(ModelFamily::TitanText) => render_titan(&turns),
        _ => render_labelled(&turns),
    };
    Ok(json!(rendered))
}

fn render_raw_prompt(body: &Value, target: &ProviderTarget, prompt: &str) -> String {
    let family = body
        .get("model")
        .and_then(Value::as_str)
        .or(target.model.as_deref())
        .and_then(ModelFamily::detect);
    match family {
        Some(ModelFamily::Llama3) => {
            render_llama3(&[("user".to_string(), prompt.to_string())])
        }
        Some(ModelFamily::Llama2) => {
            render_llama2(&[("user".to_string(), prompt.to_string())])
        }
        Some(ModelFamily::Mistral) => {
            render_mistral(&[("user".to_string(), prompt.to_string())])
        }
        _ => prompt.to_string(),
    }
}

/// Llama 3 chat template: header tokens per role, `<|eot_id|>` terminators,
/// trailing assistant header to cue the completion.
fn render_llama3(turns: &[(String, String)]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for (role, content) in turns {
        let role = match role.as_str() {
            "developer" => "system",
            other => other,
        };
        prompt.push_str(&format!(
            "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
            role, content
        ));
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

/// Llama 2 chat template: `<s>[INST] … [/INST]` turns with the system message
/// folded into the first user turn.
fn render_llama2(turns: &[(String, String)]) -> String {
    let system = turns
        .iter()
        .find(|(role, _)| role == "system" || role == "developer")
        .map(|(_, content)| content.clone());

    let mut prompt = String::new();
    let mut first_user = true;
    for (role, content) in turns {
        match role.as_str() {
            "user" => {
                let inst = if first_user {
                    first_user = false;
                    match &system {
                        Some(system) => {
                            format!("<<SYS>>\n{}\n<</SYS>>\n\n{}", system, content)
                        }
                        None => content.clone(),
                    }
                } else {
                    content.clone()
                };
                prompt.push_str(&format!("<s>[INST] {} [/INST]", inst));
            }
            "assistant" => {
                prompt.push_str(&format!(" {} </s>", content));
            }
            _ => {}
        }
    }
    prompt
}

/// Mistral instruct template: one `<s>[INST] … [/INST]` per user turn.
fn render_mistral(turns: &[(String, String)]) -> String {
    let system = turns
        .iter()
        .find(|(role, _)| role == "system" || role == "developer")
        .map(|(_, content)| content.clone());

    let mut prompt = String::new();
    let mut first_user = true;
    for (role, content) in turns {
        match role.as_str() {
            "user" => {
                let inst = if first_user {
                    first_user = false;
                    match &system {
                        Some(system) => format!("{}\n\n{}", system, content),
                        None => content.clone(),
                    }
                } else {
                    content.clone()
                };
                prompt.push_str(&format!("<s>[INST] {} [/INST]", inst));
            }
            "assistant" => {
                prompt.push_str(&format!(" {}</s>", content));
            }
            _ => {}
        }
    }
    prompt
}

/// Titan text template: plain `User:`/`Bot:` turns with a trailing `Bot:`.
fn render_titan(turns: &[(String, String)]) -> String {
    let mut prompt = String::new();
    for (role, content) in turns {
        match role.as_str() {
            "system" | "developer" => prompt.push_str(&format!("{}\n\n", content)),
            "user" => prompt.push_str(&format!("User: {}\n", content)),
            "assistant" => prompt.push_str(&format!("Bot: {}\n", content)),
            _ => {}
        }
    }
    prompt.push_str("Bot:");
    prompt
}

/// Fallback labelled transcript for Cohere command and AI21 j2.
fn render_labelled(turns: &[(String, String)]) -> String {
    if let [(role, content)] = turns {
        if role == "user" {
            return content.clone();
        }
    }
    let mut prompt = String::new();
    for (role, content) in turns {
        match role.as_str() {
            "system" | "developer" => prompt.push_str(&format!("{}\n\n", content)),
            "user" => prompt.push_str(&format!("User: {}\n", content)),
            "assistant" => prompt.push_str(&format!("Assistant: {}\n", content)),
            _ => {}
        }
    }
    prompt.push_str("Assistant:");
    prompt
}

// ============================================================
// Response transforms
// ============================================================

fn header_count(headers: &reqwest::header::HeaderMap, name: &str) -> u64 {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Extract (text, finish_reason, usage) from an invoke response body.
/// Token counts come from the `X-Amzn-Bedrock-*-Token-Count` headers unless
/// the family reports them in-body.
fn extract_invoke_output(
    family: ModelFamily,
    body: &Value,
    headers: &reqwest::header::HeaderMap,
) -> Result<(String, Option<String>, Usage), AppError> {
    let header_prompt = header_count(headers, INPUT_TOKEN_HEADER);
    let header_completion = header_count(headers, OUTPUT_TOKEN_HEADER);

    let (text, finish, prompt, completion) = match family {
        ModelFamily::Anthropic => {
            let text = body["content"]
                .as_array()
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter_map(|b| b["text"].as_str())
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .ok_or_else(|| missing(family, "content"))?;
            let prompt = body["usage"]["input_tokens"].as_u64().unwrap_or(header_prompt);
            let completion = body["usage"]["output_tokens"]
                .as_u64()
                .unwrap_or(header_completion);
            (
                text,
                body["stop_reason"].as_str().map(str::to_string),
                prompt,
                completion,
            )
        }
        ModelFamily::TitanText => {
            let result = body["results"]
                .as_array()
                .and_then(|r| r.first())
                .ok_or_else(|| missing(family, "results"))?;
            (
                result["outputText"].as_str().unwrap_or_default().to_string(),
                result["completionReason"].as_str().map(str::to_string),
                body["inputTextTokenCount"].as_u64().unwrap_or(header_prompt),
                header_completion,
            )
        }
        ModelFamily::CohereCommand => {
            let generation = body["generations"]
                .as_array()
                .and_then(|g| g.first())
                .ok_or_else(|| missing(family, "generations"))?;
            (
                generation["text"].as_str().unwrap_or_default().to_string(),
                generation["finish_reason"].as_str().map(str::to_string),
                header_prompt,
                header_completion,
            )
        }
        ModelFamily::Ai21 => {
            let completion = body["completions"]
                .as_array()
                .and_then(|c| c.first())
                .ok_or_else(|| missing(family, "completions"))?;
            (
                completion["data"]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                completion["finishReason"]["reason"].as_str().map(str::to_string),
                header_prompt,
                header_completion,
            )
        }
        ModelFamily::Llama2 | ModelFamily::Llama3 => {
            let text = body["generation"]
                .as_str()
                .ok_or_else(|| missing(family, "generation"))?;
            (
                text.to_string(),
                body["stop_reason"].as_str().map(str::to_string),
                body["prompt_token_count"].as_u64().unwrap_or(header_prompt),
                body["generation_token_count"]
                    .as_u64()
                    .unwrap_or(header_completion),
            )
        }
        ModelFamily::Mistral => {
            let output = body["outputs"]
                .as_array()
                .and_then(|o| o.first())
                .ok_or_else(|| missing(family, "outputs"))?;
            (
                output["text"].as_str().unwrap_or_default().to_string(),
                output["stop_reason"].as_str().map(str::to_string),
                header_prompt,
                header_completion,
            )
        }
        other => {
            return Err(AppError::Internal(format!(
                "family '{}' has no invoke response transform",
                other.as_str()
            )))
        }
    };

    Ok((text, finish, Usage::from_counts(prompt, completion, None, None)))
}

fn missing(family: ModelFamily, field: &str) -> AppError {
    AppError::InvalidProviderResponse(format!(
        "{} invoke response missing '{}'",
        family.as_str(),
        field
    ))
}

/// Invoke response → canonical chat completion.
pub fn transform_chat_response(
    family: ModelFamily,
    body: &Value,
    headers: &reqwest::header::HeaderMap,
    model: &str,
) -> Result<ChatCompletionResponse, AppError> {
    let (text, finish_reason, usage) = extract_invoke_output(family, body, headers)?;
    Ok(ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: Some(text),
                content_blocks: None,
                tool_calls: None,
            },
            finish_reason,
        }],
        usage: Some(usage),
    })
}

/// Invoke response → canonical text completion.
pub fn transform_completion_response(
    family: ModelFamily,
    body: &Value,
    headers: &reqwest::header::HeaderMap,
    model: &str,
) -> Result<CompletionResponse, AppError> {
    let (text, finish_reason, usage) = extract_invoke_output(family, body, headers)?;
    Ok(CompletionResponse {
        id: format!("cmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "text_completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: model.to_string(),
        choices: vec![CompletionChoice {
            text,
            index: 0,
            finish_reason,
        }],
        usage: Some(usage),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap as AxumHeaderMap, HeaderValue};

    fn test_target(model: Option<&str>) -> ProviderTarget {
        let mut headers = AxumHeaderMap::new();
        headers.insert("x-bg-aws-region", HeaderValue::from_static("us-east-1"));
        headers.insert("x-bg-aws-access-key-id", HeaderValue::from_static("AKIA"));
        headers.insert(
            "x-bg-aws-secret-access-key",
            HeaderValue::from_static("secret"),
        );
        if let Some(model) = model {
            headers.insert(
                "x-bg-aws-bedrock-model",
                HeaderValue::from_str(model).unwrap(),
            );
        }
        ProviderTarget::from_headers(&headers).unwrap()
    }

    #[test]
    fn test_anthropic_invoke_body_for_batch_rows() {
        let body = json!({
            "model": "anthropic.claude-3-haiku-20240307-v1:0",
            "messages": [{"role": "user", "content": "Hi"}]
        });
        let out = chat_request_body(ModelFamily::Anthropic, &body, &test_target(None)).unwrap();
        assert_eq!(out["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(out["max_tokens"], 4096);
        assert_eq!(
            out["messages"],
            json!([{"role": "user", "content": [{"type": "text", "text": "Hi"}]}])
        );
        assert!(out.get("system").is_none());
    }

    #[test]
    fn test_anthropic_max_completion_tokens_spelling() {
        let body = json!({
            "model": "anthropic.claude-3-haiku-20240307-v1:0",
            "messages": [{"role": "user", "content": "Hi"}],
            "max_completion_tokens": 128
        });
        let out = chat_request_body(ModelFamily::Anthropic, &body, &test_target(None)).unwrap();
        assert_eq!(out["max_tokens"], 128);
    }

    #[test]
    fn test_anthropic_system_and_tools() {
        let body = json!({
            "model": "anthropic.claude-3-haiku-20240307-v1:0",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "Hi"}
            ],
            "tools": [{
                "type": "function",
                "function": {"name": "f", "description": "d", "parameters": {"type": "object"}}
            }],
            "tool_choice": "auto"
        });
        let out = chat_request_body(ModelFamily::Anthropic, &body, &test_target(None)).unwrap();
        assert_eq!(out["system"], "Be terse.");
        assert_eq!(out["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(out["tool_choice"], json!({"type": "auto"}));
    }

    #[test]
    fn test_titan_body() {
        let body = json!({
            "model": "amazon.titan-text-express-v1",
            "messages": [{"role": "user", "content": "Hi"}],
            "max_tokens": 100,
            "temperature": 0.3,
            "stop": ["\n"]
        });
        let out = chat_request_body(ModelFamily::TitanText, &body, &test_target(None)).unwrap();
        assert_eq!(out["inputText"], "User: Hi\nBot:");
        assert_eq!(out["textGenerationConfig"]["maxTokenCount"], 100);
        assert_eq!(out["textGenerationConfig"]["temperature"], 0.3);
        assert_eq!(out["textGenerationConfig"]["stopSequences"], json!(["\n"]));
    }

    #[test]
    fn test_cohere_body_maps_top_p_to_p() {
        let body = json!({
            "model": "cohere.command-text-v14",
            "messages": [{"role": "user", "content": "Hi"}],
            "top_p": 0.8,
            "top_k": 50,
            "n": 2
        });
        let out =
            chat_request_body(ModelFamily::CohereCommand, &body, &test_target(None)).unwrap();
        assert_eq!(out["prompt"], "Hi");
        assert_eq!(out["p"], 0.8);
        assert_eq!(out["k"], 50);
        assert_eq!(out["num_generations"], 2);
    }

    #[test]
    fn test_ai21_penalties() {
        let body = json!({
            "model": "ai21.j2-mid-v1",
            "messages": [{"role": "user", "content": "Hi"}],
            "max_tokens": 50,
            "frequency_penalty": 0.5,
            "countPenalty": {"scale": 0.2}
        });
        let out = chat_request_body(ModelFamily::Ai21, &body, &test_target(None)).unwrap();
        assert_eq!(out["maxTokens"], 50);
        assert_eq!(out["frequencyPenalty"], json!({"scale": 0.5}));
        assert_eq!(out["countPenalty"], json!({"scale": 0.2}));
    }

    #[test]
    fn test_llama3_prompt_dialect() {
        let body = json!({
            "model": "meta.llama3-8b-instruct-v1:0",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Hi"}
            ],
            "max_tokens": 64
        });
        let out = chat_request_body(ModelFamily::Llama3, &body, &test_target(None)).unwrap();
        let prompt = out["prompt"].as_str().unwrap();
        assert!(prompt.starts_with("<|begin_of_text|>"));
        assert!(prompt.contains("<|start_header_id|>system<|end_header_id|>\n\nBe brief.<|eot_id|>"));
        assert!(prompt.contains("<|start_header_id|>user<|end_header_id|>\n\nHi<|eot_id|>"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
        assert_eq!(out["max_gen_len"], 64);
    }

    #[test]
    fn test_llama2_system_folded_into_first_user_turn() {
        let turns = vec![
            ("system".to_string(), "Be brief.".to_string()),
            ("user".to_string(), "Hi".to_string()),
        ];
        let prompt = render_llama2(&turns);
        assert_eq!(prompt, "<s>[INST] <<SYS>>\nBe brief.\n<</SYS>>\n\nHi [/INST]");
    }

    #[test]
    fn test_mistral_per_turn_template() {
        let turns = vec![
            ("user".to_string(), "One".to_string()),
            ("assistant".to_string(), "Two".to_string()),
            ("user".to_string(), "Three".to_string()),
        ];
        let prompt = render_mistral(&turns);
        assert_eq!(prompt, "<s>[INST] One [/INST] Two</s><s>[INST] Three [/INST]");
    }

    #[test]
    fn test_raw_prompt_passthrough() {
        let body = json!({
            "model": "cohere.command-text-v14",
            "prompt": "Write a haiku"
        });
        let out =
            chat_request_body(ModelFamily::CohereCommand, &body, &test_target(None)).unwrap();
        assert_eq!(out["prompt"], "Write a haiku");
    }

    fn token_headers(input: u64, output: u64) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            INPUT_TOKEN_HEADER,
            input.to_string().parse().unwrap(),
        );
        headers.insert(
            OUTPUT_TOKEN_HEADER,
            output.to_string().parse().unwrap(),
        );
        headers
    }

    #[test]
    fn test_titan_response_with_header_usage() {
        let body = json!({
            "inputTextTokenCount": 4,
            "results": [{"outputText": "Hello.", "completionReason": "FINISH"}]
        });
        let response = transform_chat_response(
            ModelFamily::TitanText,
            &body,
            &token_headers(4, 2),
            "amazon.titan-text-express-v1",
        )
        .unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hello."));
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("FINISH"));
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 4);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 6);
    }

    #[test]
    fn test_header_usage_defaults_to_zero() {
        let body = json!({"generations": [{"text": "ok", "finish_reason": "COMPLETE"}]});
        let response = transform_chat_response(
            ModelFamily::CohereCommand,
            &body,
            &reqwest::header::HeaderMap::new(),
            "cohere.command-text-v14",
        )
        .unwrap();
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 0);
    }

    #[test]
    fn test_llama_response_in_body_counts() {
        let body = json!({
            "generation": "Hi there",
            "stop_reason": "stop",
            "prompt_token_count": 9,
            "generation_token_count": 3
        });
        let response = transform_completion_response(
            ModelFamily::Llama3,
            &body,
            &reqwest::header::HeaderMap::new(),
            "meta.llama3-8b-instruct-v1:0",
        )
        .unwrap();
        assert_eq!(response.object, "text_completion");
        assert_eq!(response.choices[0].text, "Hi there");
        assert_eq!(response.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn test_mistral_response() {
        let body = json!({"outputs": [{"text": "ok", "stop_reason": "stop"}]});
        let response = transform_chat_response(
            ModelFamily::Mistral,
            &body,
            &token_headers(5, 1),
            "mistral.mistral-7b-instruct-v0:2",
        )
        .unwrap();
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_ai21_response() {
        let body = json!({
            "completions": [{"data": {"text": "ok"}, "finishReason": {"reason": "endoftext"}}]
        });
        let response = transform_chat_response(
            ModelFamily::Ai21,
            &body,
            &token_headers(2, 1),
            "ai21.j2-mid-v1",
        )
        .unwrap();
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("endoftext"));
    }

    #[test]
    fn test_malformed_invoke_response_rejected() {
        let body = json!({"nope": true});
        assert!(matches!(
            transform_chat_response(
                ModelFamily::TitanText,
                &body,
                &reqwest::header::HeaderMap::new(),
                "amazon.titan-text-express-v1"
            ),
            Err(AppError::InvalidProviderResponse(_))
        ));
    }
}
