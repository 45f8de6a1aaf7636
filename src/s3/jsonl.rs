//! JSONL line transforms for the S3 file bridge.
//!
//! Upload side: canonical batch/fine-tune dataset rows are rewritten into
//! the shapes Bedrock jobs consume. Download side: batch output rows are
//! rewritten into canonical per-row results.

use crate::error::AppError;
use crate::providers::family::ModelFamily;
use crate::providers::{converse, invoke};
use crate::target::{FilePurpose, ModelType, ProviderTarget};
use serde_json::{json, Value};

/// What an uploaded line is transformed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Batch,
    FineTuneChat,
    FineTuneText,
}

impl UploadKind {
    pub fn from_target(target: &ProviderTarget) -> Result<Self, AppError> {
        match (target.file_purpose, target.model_type) {
            (Some(FilePurpose::Batch), _) => Ok(UploadKind::Batch),
            (Some(FilePurpose::FineTune), Some(ModelType::Text)) => Ok(UploadKind::FineTuneText),
            (Some(FilePurpose::FineTune), _) => Ok(UploadKind::FineTuneChat),
            (None, _) => Err(AppError::Validation(
                "x-bg-file-purpose header is required for uploads".to_string(),
            )),
        }
    }
}

/// Transform one uploaded JSONL line. The returned line is CRLF-terminated.
pub fn transform_upload_line(
    kind: UploadKind,
    line: &str,
    target: &ProviderTarget,
) -> Result<String, AppError> {
    let row: Value = serde_json::from_str(line)
        .map_err(|e| AppError::Validation(format!("malformed JSONL line: {}", e)))?;

    let out = match kind {
        UploadKind::Batch => batch_input_row(&row, target)?,
        UploadKind::FineTuneChat => finetune_chat_row(&row)?,
        UploadKind::FineTuneText => finetune_text_row(&row)?,
    };

    let mut text = serde_json::to_string(&out)
        .map_err(|e| AppError::Internal(format!("serialising JSONL row: {}", e)))?;
    text.push_str("\r\n");
    Ok(text)
}

/// `{custom_id, body}` → `{recordId, modelInput}` via the model family's
/// chat-complete config.
fn batch_input_row(row: &Value, target: &ProviderTarget) -> Result<Value, AppError> {
    let custom_id = row["custom_id"].as_str().ok_or_else(|| {
        AppError::Validation("batch input row requires 'custom_id'".to_string())
    })?;
    let body = row
        .get("body")
        .filter(|b| b.is_object())
        .ok_or_else(|| AppError::Validation("batch input row requires 'body'".to_string()))?;

    let model = body["model"]
        .as_str()
        .or(target.model.as_deref())
        .ok_or_else(|| AppError::Validation("batch input row missing 'body.model'".to_string()))?;
    let family = ModelFamily::detect(model).ok_or_else(|| {
        AppError::Validation(format!("unrecognised Bedrock model '{}'", model))
    })?;

    let model_input = invoke::chat_request_body(family, body, target)?;

    Ok(json!({ "recordId": custom_id, "modelInput": model_input }))
}

/// Chat fine-tune rows: `{messages}` with an optional leading system message
/// and a mandatory trailing assistant message → `{system, messages}`.
fn finetune_chat_row(row: &Value) -> Result<Value, AppError> {
    let messages = row["messages"]
        .as_array()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            AppError::Validation("fine-tune chat row requires non-empty 'messages'".to_string())
        })?;

    for message in messages {
        match message["role"].as_str() {
            Some("system") | Some("user") | Some("assistant") => {}
            other => {
                return Err(AppError::Validation(format!(
                    "fine-tune chat row has invalid role {:?}",
                    other
                )))
            }
        }
    }

    let (system, rest) = match messages.first() {
        Some(first) if first["role"] == "system" => (
            first["content"].as_str().map(str::to_string),
            &messages[1..],
        ),
        _ => (None, &messages[..]),
    };

    if rest.iter().any(|m| m["role"] == "system") {
        return Err(AppError::Validation(
            "fine-tune chat row allows system only as the first message".to_string(),
        ));
    }
    if rest.last().map(|m| m["role"].as_str()) != Some(Some("assistant")) {
        return Err(AppError::Validation(
            "fine-tune chat row must end with an assistant message".to_string(),
        ));
    }

    let messages: Vec<Value> = rest
        .iter()
        .map(|m| json!({ "role": m["role"], "content": m["content"] }))
        .collect();

    let mut out = json!({ "messages": messages });
    if let Some(system) = system {
        out["system"] = json!(system);
    }
    Ok(out)
}

/// Text fine-tune rows: pre-shaped `{prompt, completion}` passes through; a
/// two-turn chat row is down-converted.
fn finetune_text_row(row: &Value) -> Result<Value, AppError> {
    if let (Some(prompt), Some(completion)) = (row["prompt"].as_str(), row["completion"].as_str()) {
        return Ok(json!({ "prompt": prompt, "completion": completion }));
    }

    if let Some(messages) = row["messages"].as_array() {
        let non_system: Vec<&Value> = messages
            .iter()
            .filter(|m| m["role"] != "system")
            .collect();
        if let [user, assistant] = non_system.as_slice() {
            if user["role"] == "user" && assistant["role"] == "assistant" {
                return Ok(json!({
                    "prompt": user["content"].as_str().unwrap_or_default(),
                    "completion": assistant["content"].as_str().unwrap_or_default(),
                }));
            }
        }
        return Err(AppError::Validation(
            "text fine-tune chat rows must be a single user/assistant exchange".to_string(),
        ));
    }

    Err(AppError::Validation(
        "text fine-tune row requires 'prompt' and 'completion'".to_string(),
    ))
}

// ============================================================
// Batch output rows
// ============================================================

/// Detect the family from the shape of a batch `modelOutput`.
fn detect_output_family(output: &Value) -> Option<ModelFamily> {
    if output.get("content").is_some() {
        Some(ModelFamily::Anthropic)
    } else if output.get("results").is_some() {
        Some(ModelFamily::TitanText)
    } else if output.get("generations").is_some() {
        Some(ModelFamily::CohereCommand)
    } else if output.get("completions").is_some() {
        Some(ModelFamily::Ai21)
    } else if output.get("generation").is_some() {
        Some(ModelFamily::Llama3)
    } else if output.get("outputs").is_some() {
        Some(ModelFamily::Mistral)
    } else if output.get("output").is_some() {
        // Converse-shaped modelOutput
        None
    } else {
        None
    }
}

/// Rewrite one batch output NDJSON line into the canonical per-row result.
/// Rows that do not look like Bedrock batch output pass through unchanged
/// (identity transform), so plain object downloads keep working.
pub fn transform_output_line(line: &str, target: &ProviderTarget) -> String {
    let Ok(row) = serde_json::from_str::<Value>(line) else {
        return line.to_string();
    };
    let Some(record_id) = row["recordId"].as_str().map(str::to_string) else {
        return line.to_string();
    };

    if let Some(error) = row.get("error").filter(|e| !e.is_null()) {
        let out = json!({
            "id": format!("batch_req_{}", record_id),
            "custom_id": record_id,
            "response": null,
            "error": {
                "message": error["errorMessage"].as_str()
                    .or_else(|| error.as_str())
                    .unwrap_or("batch row failed"),
                "code": error["errorCode"].as_str(),
            }
        });
        return out.to_string();
    }

    let Some(output) = row.get("modelOutput").filter(|o| o.is_object()) else {
        return line.to_string();
    };

    let model = target.model.as_deref().unwrap_or_default();
    let body = if output.get("output").is_some() {
        converse::transform_chat_response(output, model, target.strict_openai_compliance)
            .ok()
            .and_then(|r| serde_json::to_value(r).ok())
    } else {
        detect_output_family(output).and_then(|family| {
            invoke::transform_chat_response(
                family,
                output,
                &reqwest::header::HeaderMap::new(),
                model,
            )
            .ok()
            .and_then(|r| serde_json::to_value(r).ok())
        })
    };

    match body {
        Some(body) => json!({
            "id": format!("batch_req_{}", record_id),
            "custom_id": record_id,
            "response": {
                "status_code": 200,
                "request_id": record_id,
                "body": body,
            },
            "error": null,
        })
        .to_string(),
        None => line.to_string(),
    }
}
