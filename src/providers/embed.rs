//! Embedding transforms for Titan and Cohere models on Bedrock.

use crate::error::AppError;
use crate::models::openai::{EmbeddingDatum, EmbeddingsResponse, EmbeddingsUsage};
use crate::providers::family::ModelFamily;
use crate::providers::invoke::INPUT_TOKEN_HEADER;
use crate::target::ProviderTarget;
use crate::transform::{FieldRule, FieldSpec, FunctionConfig, TransformError};
use serde_json::{json, Value};
use std::sync::OnceLock;

/// Build the invoke body for an embeddings request.
pub fn request_body(
    family: ModelFamily,
    body: &Value,
    target: &ProviderTarget,
) -> Result<Value, TransformError> {
    let config = match family {
        ModelFamily::TitanEmbed => titan_config(),
        ModelFamily::CohereEmbed => cohere_config(),
        other => {
            return Err(TransformError::Invalid(format!(
                "family '{}' has no embeddings config",
                other.as_str()
            )))
        }
    };
    config.apply(body, target)
}

fn titan_config() -> &'static FunctionConfig {
    static CONFIG: OnceLock<FunctionConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        FunctionConfig::new(vec![
            (
                "input",
                FieldRule::Transform {
                    spec: FieldSpec::at("inputText").required(),
                    f: titan_input,
                },
            ),
            ("dimensions", FieldRule::Copy(FieldSpec::at("dimensions"))),
            ("normalize", FieldRule::Copy(FieldSpec::at("normalize"))),
        ])
    })
}

fn cohere_config() -> &'static FunctionConfig {
    static CONFIG: OnceLock<FunctionConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        FunctionConfig::new(vec![
            (
                "input",
                FieldRule::Transform {
                    spec: FieldSpec::at("texts").required(),
                    f: cohere_texts,
                },
            ),
            (
                "input_type",
                FieldRule::Copy(
                    FieldSpec::at("input_type").default_value(json!("search_document")),
                ),
            ),
            ("truncate", FieldRule::Copy(FieldSpec::at("truncate"))),
        ])
    })
}

/// Titan embeds one text per call.
fn titan_input(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    match &body["input"] {
        Value::String(s) => Ok(json!(s)),
        Value::Array(items) => match items.as_slice() {
            [Value::String(s)] => Ok(json!(s)),
            _ => Err(TransformError::Invalid(
                "Titan embedding models accept exactly one input text".to_string(),
            )),
        },
        _ => Err(TransformError::Invalid(
            "input must be a string or an array of strings".to_string(),
        )),
    }
}

fn cohere_texts(body: &Value, _target: &ProviderTarget) -> Result<Value, TransformError> {
    match &body["input"] {
        Value::String(s) => Ok(json!([s])),
        Value::Array(items) => {
            if items.iter().all(Value::is_string) {
                Ok(Value::Array(items.clone()))
            } else {
                Err(TransformError::Invalid(
                    "input must be a string or an array of strings".to_string(),
                ))
            }
        }
        _ => Err(TransformError::Invalid(
            "input must be a string or an array of strings".to_string(),
        )),
    }
}

/// Invoke response → canonical embeddings list.
pub fn transform_response(
    family: ModelFamily,
    body: &Value,
    headers: &reqwest::header::HeaderMap,
    model: &str,
) -> Result<EmbeddingsResponse, AppError> {
    let header_tokens = headers
        .get(INPUT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let (data, prompt_tokens) = match family {
        ModelFamily::TitanEmbed => {
            let embedding = body["embedding"]
                .as_array()
                .ok_or_else(|| {
                    AppError::InvalidProviderResponse(
                        "Titan embeddings response missing 'embedding'".to_string(),
                    )
                })?
                .iter()
                .filter_map(Value::as_f64)
                .collect::<Vec<_>>();
            let tokens = body["inputTextTokenCount"].as_u64().unwrap_or(header_tokens);
            (
                vec![EmbeddingDatum {
                    object: "embedding".to_string(),
                    embedding,
                    index: 0,
                }],
                tokens,
            )
        }
        ModelFamily::CohereEmbed => {
            let vectors = body["embeddings"].as_array().ok_or_else(|| {
                AppError::InvalidProviderResponse(
                    "Cohere embeddings response missing 'embeddings'".to_string(),
                )
            })?;
            let data = vectors
                .iter()
                .enumerate()
                .map(|(index, vector)| EmbeddingDatum {
                    object: "embedding".to_string(),
                    embedding: vector
                        .as_array()
                        .map(|v| v.iter().filter_map(Value::as_f64).collect())
                        .unwrap_or_default(),
                    index: index as u32,
                })
                .collect();
            (data, header_tokens)
        }
        other => {
            return Err(AppError::Internal(format!(
                "family '{}' has no embeddings response transform",
                other.as_str()
            )))
        }
    };

    Ok(EmbeddingsResponse {
        object: "list".to_string(),
        data,
        model: model.to_string(),
        usage: EmbeddingsUsage {
            prompt_tokens,
            total_tokens: prompt_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap as AxumHeaderMap, HeaderValue};

    fn test_target() -> ProviderTarget {
        let mut headers = AxumHeaderMap::new();
        headers.insert("x-bg-aws-region", HeaderValue::from_static("us-east-1"));
        headers.insert("x-bg-aws-access-key-id", HeaderValue::from_static("AKIA"));
        headers.insert(
            "x-bg-aws-secret-access-key",
            HeaderValue::from_static("secret"),
        );
        ProviderTarget::from_headers(&headers).unwrap()
    }

    #[test]
    fn test_cohere_request_scenario_c() {
        let body = json!({
            "model": "cohere.embed-english-v3",
            "input": ["hello", "world"],
            "input_type": "search_query"
        });
        let out = request_body(ModelFamily::CohereEmbed, &body, &test_target()).unwrap();
        assert_eq!(out, json!({"texts": ["hello", "world"], "input_type": "search_query"}));
    }

    #[test]
    fn test_cohere_input_type_defaults() {
        let body = json!({"model": "cohere.embed-english-v3", "input": "hi"});
        let out = request_body(ModelFamily::CohereEmbed, &body, &test_target()).unwrap();
        assert_eq!(out["input_type"], "search_document");
        assert_eq!(out["texts"], json!(["hi"]));
    }

    #[test]
    fn test_titan_rejects_multiple_inputs() {
        let body = json!({"model": "amazon.titan-embed-text-v1", "input": ["a", "b"]});
        assert!(request_body(ModelFamily::TitanEmbed, &body, &test_target()).is_err());
    }

    #[test]
    fn test_titan_single_input() {
        let body = json!({"model": "amazon.titan-embed-text-v1", "input": "hello"});
        let out = request_body(ModelFamily::TitanEmbed, &body, &test_target()).unwrap();
        assert_eq!(out["inputText"], "hello");
    }

    #[test]
    fn test_cohere_response_scenario_c() {
        let body = json!({"embeddings": [[0.1, 0.2], [0.3, 0.4]]});
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(INPUT_TOKEN_HEADER, "2".parse().unwrap());

        let response = transform_response(
            ModelFamily::CohereEmbed,
            &body,
            &headers,
            "cohere.embed-english-v3",
        )
        .unwrap();

        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[0].object, "embedding");
        assert_eq!(response.data[0].embedding, vec![0.1, 0.2]);
        assert_eq!(response.data[0].index, 0);
        assert_eq!(response.data[1].index, 1);
        assert_eq!(response.usage.prompt_tokens, 2);
        assert_eq!(response.usage.total_tokens, 2);
    }

    #[test]
    fn test_titan_response() {
        let body = json!({"embedding": [0.5, 0.6, 0.7], "inputTextTokenCount": 3});
        let response = transform_response(
            ModelFamily::TitanEmbed,
            &body,
            &reqwest::header::HeaderMap::new(),
            "amazon.titan-embed-text-v1",
        )
        .unwrap();
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].embedding.len(), 3);
        assert_eq!(response.usage.prompt_tokens, 3);
    }

    #[test]
    fn test_malformed_response_rejected() {
        let body = json!({});
        assert!(matches!(
            transform_response(
                ModelFamily::CohereEmbed,
                &body,
                &reqwest::header::HeaderMap::new(),
                "cohere.embed-english-v3"
            ),
            Err(AppError::InvalidProviderResponse(_))
        ));
    }
}
