//! Image-generation transforms for Stability models on Bedrock.

use crate::error::AppError;
use crate::models::openai::{ImageDatum, ImageGenerationResponse};
use crate::providers::family::ModelFamily;
use crate::target::ProviderTarget;
use crate::transform::{FieldRule, FieldSpec, FunctionConfig, TransformError};
use serde_json::{json, Value};
use std::sync::OnceLock;

/// Build the invoke body for an image-generation request.
pub fn request_body(
    family: ModelFamily,
    body: &Value,
    target: &ProviderTarget,
) -> Result<Value, TransformError> {
    let config = match family {
        ModelFamily::StabilityV1 => v1_config(),
        ModelFamily::StabilityV2 => v2_config(),
        other => {
            return Err(TransformError::Invalid(format!(
                "family '{}' has no image generation config",
                other.as_str()
            )))
        }
    };
    config.apply(body, target)
}

fn v1_config() -> &'static FunctionConfig {
    static CONFIG: OnceLock<FunctionConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        FunctionConfig::new(vec![
            (
                "prompt",
                FieldRule::Transform {
                    spec: FieldSpec::at("text_prompts").required(),
                    f: text_prompts,
                },
            ),
            ("n", FieldRule::Copy(FieldSpec::at("samples").range(1.0, 10.0))),
            (
                "size",
                FieldRule::Fanout(vec![
                    FieldRule::Transform {
                        spec: FieldSpec::at("width"),
                        f: size_width,
                    },
                    FieldRule::Transform {
                        spec: FieldSpec::at("height"),
                        f: size_height,
                    },
                ]),
            ),
            ("cfg_scale", FieldRule::Copy(FieldSpec::at("cfg_scale"))),
            ("seed", FieldRule::Copy(FieldSpec::at("seed"))),
            ("steps", FieldRule::Copy(FieldSpec::at("steps"))),
        ])
    })
}

fn v2_config() -> &'static FunctionConfig {
    static CONFIG: OnceLock<FunctionConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        FunctionConfig::new(vec![
            ("prompt", FieldRule::Copy(FieldSpec::at("prompt").required())),
            ("seed", FieldRule::Copy(FieldSpec::at("seed"))),
            (
                "aspect_ratio",
                FieldRule::Copy(FieldSpec::at("aspect_ratio")),
            ),
            (
                "response_format",
                FieldRule::Const {
                    path: "output_format",
                    value: json!("png"),
                },
            ),
        ])
    })
}

fn text_prompts(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    let prompt = body["prompt"]
        .as_str()
        .ok_or_else(|| TransformError::Invalid("prompt must be a string".to_string()))?;
    Ok(json!([{ "text": prompt }]))
}

fn parse_size(body: &Value) -> Option<(u32, u32)> {
    let size = body["size"].as_str()?;
    let (w, h) = size.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

fn size_width(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    match parse_size(body) {
        Some((w, _)) => Ok(json!(w)),
        None => Err(TransformError::Invalid(
            "size must be '{width}x{height}'".to_string(),
        )),
    }
}

fn size_height(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    match parse_size(body) {
        Some((_, h)) => Ok(json!(h)),
        None => Err(TransformError::Invalid(
            "size must be '{width}x{height}'".to_string(),
        )),
    }
}

/// Invoke response → canonical image list. V1 reports `artifacts[].base64`,
/// V2 reports `images[]`.
pub fn transform_response(
    family: ModelFamily,
    body: &Value,
) -> Result<ImageGenerationResponse, AppError> {
    let data: Vec<ImageDatum> = match family {
        ModelFamily::StabilityV1 => body["artifacts"]
            .as_array()
            .ok_or_else(|| {
                AppError::InvalidProviderResponse(
                    "Stability V1 response missing 'artifacts'".to_string(),
                )
            })?
            .iter()
            .filter_map(|artifact| artifact["base64"].as_str())
            .map(|b64| ImageDatum {
                b64_json: Some(b64.to_string()),
                url: None,
            })
            .collect(),
        ModelFamily::StabilityV2 => body["images"]
            .as_array()
            .ok_or_else(|| {
                AppError::InvalidProviderResponse(
                    "Stability V2 response missing 'images'".to_string(),
                )
            })?
            .iter()
            .filter_map(Value::as_str)
            .map(|b64| ImageDatum {
                b64_json: Some(b64.to_string()),
                url: None,
            })
            .collect(),
        other => {
            return Err(AppError::Internal(format!(
                "family '{}' has no image response transform",
                other.as_str()
            )))
        }
    };

    Ok(ImageGenerationResponse {
        created: chrono::Utc::now().timestamp() as u64,
        data,
    })
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
    fn test_v1_request() {
        let body = json!({
            "model": "stability.stable-diffusion-xl-v1",
            "prompt": "a lighthouse at dusk",
            "n": 2,
            "size": "512x768"
        });
        let out = request_body(ModelFamily::StabilityV1, &body, &test_target()).unwrap();
        assert_eq!(out["text_prompts"], json!([{"text": "a lighthouse at dusk"}]));
        assert_eq!(out["samples"], 2);
        assert_eq!(out["width"], 512);
        assert_eq!(out["height"], 768);
    }

    #[test]
    fn test_v1_invalid_size_rejected() {
        let body = json!({
            "model": "stability.stable-diffusion-xl-v1",
            "prompt": "x",
            "size": "huge"
        });
        assert!(request_body(ModelFamily::StabilityV1, &body, &test_target()).is_err());
    }

    #[test]
    fn test_v2_request() {
        let body = json!({
            "model": "stability.sd3-large-v1:0",
            "prompt": "a lighthouse at dusk"
        });
        let out = request_body(ModelFamily::StabilityV2, &body, &test_target()).unwrap();
        assert_eq!(out["prompt"], "a lighthouse at dusk");
        assert_eq!(out["output_format"], "png");
    }

    #[test]
    fn test_v1_response() {
        let body = json!({"artifacts": [{"base64": "aW1n", "finishReason": "SUCCESS"}]});
        let response = transform_response(ModelFamily::StabilityV1, &body).unwrap();
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].b64_json.as_deref(), Some("aW1n"));
    }

    #[test]
    fn test_v2_response() {
        let body = json!({"images": ["aW1nMQ==", "aW1nMg=="]});
        let response = transform_response(ModelFamily::StabilityV2, &body).unwrap();
        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[1].b64_json.as_deref(), Some("aW1nMg=="));
    }

    #[test]
    fn test_missing_artifacts_rejected() {
        assert!(matches!(
            transform_response(ModelFamily::StabilityV1, &json!({})),
            Err(AppError::InvalidProviderResponse(_))
        ));
    }
}
