//! Operation router: canonical operation → upstream endpoint descriptor.
//!
//! Inference goes to `bedrock-runtime` (`/converse` for converse-eligible
//! models, `/invoke` otherwise), job control-plane to `bedrock`, and file
//! traffic to `s3` virtual-host URLs. Unsupported operations fail here with
//! a deterministic envelope before any upstream call.

use crate::error::{map_upstream_error, AppError};
use crate::providers::family::ModelFamily;
use crate::sigv4::{self, url_encode_path, Credentials, SigningRequest};
use crate::target::ProviderTarget;
use axum::http::StatusCode;
use reqwest::Method;
use std::time::Duration;

/// Canonical operations exposed by the gateway core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ChatComplete { stream: bool },
    Complete { stream: bool },
    Embed,
    GenerateImage,
    CreateBatch,
    RetrieveBatch,
    ListBatches,
    CancelBatch,
    GetBatchOutput,
    CreateFineTune,
    RetrieveFineTune,
    ListFineTunes,
    CancelFineTune,
    UploadFile,
    RetrieveFile,
    RetrieveFileContent,
    ListFiles,
    DeleteFile,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ChatComplete { .. } => "chatComplete",
            Operation::Complete { .. } => "complete",
            Operation::Embed => "embed",
            Operation::GenerateImage => "generateImage",
            Operation::CreateBatch => "createBatch",
            Operation::RetrieveBatch => "retrieveBatch",
            Operation::ListBatches => "listBatches",
            Operation::CancelBatch => "cancelBatch",
            Operation::GetBatchOutput => "getBatchOutput",
            Operation::CreateFineTune => "createFinetune",
            Operation::RetrieveFineTune => "retrieveFinetune",
            Operation::ListFineTunes => "listFinetunes",
            Operation::CancelFineTune => "cancelFinetune",
            Operation::UploadFile => "uploadFile",
            Operation::RetrieveFile => "retrieveFile",
            Operation::RetrieveFileContent => "retrieveFileContent",
            Operation::ListFiles => "listFiles",
            Operation::DeleteFile => "deleteFile",
        }
    }
}

/// Fully resolved upstream call target.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub method: Method,
    pub service: &'static str,
    pub url: url::Url,
}

fn parse_url(raw: &str) -> Result<url::Url, AppError> {
    url::Url::parse(raw).map_err(|e| AppError::Internal(format!("invalid upstream URL: {}", e)))
}

/// Regional Bedrock control-plane host.
pub fn bedrock_base(target: &ProviderTarget) -> String {
    match &target.endpoint_url {
        Some(endpoint) => endpoint.clone(),
        None => format!("https://bedrock.{}.amazonaws.com", target.region),
    }
}

/// Regional Bedrock runtime host.
pub fn runtime_base(target: &ProviderTarget) -> String {
    match &target.endpoint_url {
        Some(endpoint) => endpoint.clone(),
        None => format!("https://bedrock-runtime.{}.amazonaws.com", target.region),
    }
}

/// S3 base for the target bucket: virtual-host style against AWS, path
/// style when a custom endpoint is configured.
pub fn s3_base(target: &ProviderTarget, bucket: &str) -> String {
    match &target.endpoint_url {
        Some(endpoint) => format!("{}/{}", endpoint, bucket),
        None => format!("https://{}.s3.{}.amazonaws.com", bucket, target.region),
    }
}

/// Resolve the endpoint for an operation. `resource` carries the job id or
/// S3 object key for retrieval-style operations.
pub fn endpoint(
    op: Operation,
    target: &ProviderTarget,
    resource: Option<&str>,
) -> Result<Endpoint, AppError> {
    match op {
        Operation::ChatComplete { stream } => {
            let model = target.require_model()?;
            let family = ModelFamily::detect(model).ok_or_else(|| {
                AppError::Validation(format!("unrecognised Bedrock model '{}'", model))
            })?;
            if family.converse_eligible(model) {
                let action = if stream { "converse-stream" } else { "converse" };
                Ok(Endpoint {
                    method: Method::POST,
                    service: "bedrock-runtime",
                    url: parse_url(&format!(
                        "{}/model/{}/{}",
                        runtime_base(target),
                        url_encode_path(model),
                        action
                    ))?,
                })
            } else {
                invoke_endpoint(target, model, stream)
            }
        }
        Operation::Complete { stream } => {
            let model = target.require_model()?;
            invoke_endpoint(target, model, stream)
        }
        Operation::Embed | Operation::GenerateImage => {
            let model = target.require_model()?;
            invoke_endpoint(target, model, false)
        }
        Operation::CreateBatch => Ok(Endpoint {
            method: Method::POST,
            service: "bedrock",
            url: parse_url(&format!("{}/model-invocation-job", bedrock_base(target)))?,
        }),
        Operation::RetrieveBatch => {
            let id = require_resource(resource, "batch id")?;
            Ok(Endpoint {
                method: Method::GET,
                service: "bedrock",
                url: parse_url(&format!(
                    "{}/model-invocation-job/{}",
                    bedrock_base(target),
                    url_encode_path(id)
                ))?,
            })
        }
        Operation::CancelBatch => {
            let id = require_resource(resource, "batch id")?;
            Ok(Endpoint {
                method: Method::POST,
                service: "bedrock",
                url: parse_url(&format!(
                    "{}/model-invocation-job/{}/stop",
                    bedrock_base(target),
                    url_encode_path(id)
                ))?,
            })
        }
        Operation::ListBatches => Ok(Endpoint {
            method: Method::GET,
            service: "bedrock",
            url: parse_url(&format!("{}/model-invocation-jobs", bedrock_base(target)))?,
        }),
        Operation::CreateFineTune => Ok(Endpoint {
            method: Method::POST,
            service: "bedrock",
            url: parse_url(&format!(
                "{}/model-customization-job",
                bedrock_base(target)
            ))?,
        }),
        Operation::RetrieveFineTune => {
            let id = require_resource(resource, "fine-tuning job id")?;
            Ok(Endpoint {
                method: Method::GET,
                service: "bedrock",
                url: parse_url(&format!(
                    "{}/model-customization-job/{}",
                    bedrock_base(target),
                    url_encode_path(id)
                ))?,
            })
        }
        Operation::CancelFineTune => {
            let id = require_resource(resource, "fine-tuning job id")?;
            Ok(Endpoint {
                method: Method::POST,
                service: "bedrock",
                url: parse_url(&format!(
                    "{}/model-customization-job/{}/stop",
                    bedrock_base(target),
                    url_encode_path(id)
                ))?,
            })
        }
        Operation::ListFineTunes => Ok(Endpoint {
            method: Method::GET,
            service: "bedrock",
            url: parse_url(&format!(
                "{}/model-customization-jobs",
                bedrock_base(target)
            ))?,
        }),
        Operation::RetrieveFileContent | Operation::GetBatchOutput => {
            let key = require_resource(resource, "S3 object key")?;
            let bucket = target.require_bucket()?;
            Ok(Endpoint {
                method: Method::GET,
                service: "s3",
                url: parse_url(&format!(
                    "{}/{}",
                    s3_base(target, bucket),
                    encode_key(key)
                ))?,
            })
        }
        Operation::RetrieveFile => {
            let key = require_resource(resource, "S3 object key")?;
            let bucket = target.require_bucket()?;
            Ok(Endpoint {
                method: Method::GET,
                service: "s3",
                url: parse_url(&format!(
                    "{}/{}?attributes",
                    s3_base(target, bucket),
                    encode_key(key)
                ))?,
            })
        }
        // Multipart initiate/part/complete endpoints live in the S3 bridge.
        Operation::UploadFile => Err(AppError::Internal(
            "uploadFile is routed through the S3 multipart bridge".to_string(),
        )),
        Operation::ListFiles | Operation::DeleteFile => {
            Err(AppError::unsupported(op.name(), &target.provider))
        }
    }
}

fn invoke_endpoint(
    target: &ProviderTarget,
    model: &str,
    stream: bool,
) -> Result<Endpoint, AppError> {
    let action = if stream {
        "invoke-with-response-stream"
    } else {
        "invoke"
    };
    Ok(Endpoint {
        method: Method::POST,
        service: "bedrock-runtime",
        url: parse_url(&format!(
            "{}/model/{}/{}",
            runtime_base(target),
            url_encode_path(model),
            action
        ))?,
    })
}

fn require_resource<'a>(resource: Option<&'a str>, what: &str) -> Result<&'a str, AppError> {
    resource.ok_or_else(|| AppError::Validation(format!("missing {}", what)))
}

/// Encode an S3 key, keeping `/` separators.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(url_encode_path)
        .collect::<Vec<_>>()
        .join("/")
}

/// Sign and send one upstream request.
pub async fn send_signed(
    client: &reqwest::Client,
    creds: &Credentials,
    endpoint: &Endpoint,
    region: &str,
    extra_headers: &[(String, String)],
    body: Vec<u8>,
    timeout: Duration,
) -> Result<reqwest::Response, AppError> {
    let signed = sigv4::sign(
        &SigningRequest {
            method: endpoint.method.as_str(),
            url: &endpoint.url,
            headers: extra_headers,
            body: &body,
            region,
            service: endpoint.service,
        },
        creds,
        chrono::Utc::now(),
    )
    .map_err(|e| AppError::Credential(e.to_string()))?;

    tracing::debug!(
        method = %endpoint.method,
        url = %endpoint.url,
        service = endpoint.service,
        "Sending signed upstream request"
    );

    let mut request = client
        .request(endpoint.method.clone(), endpoint.url.clone())
        .timeout(timeout);
    for (key, value) in &signed {
        request = request.header(key.as_str(), value.as_str());
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    Ok(request.send().await?)
}

/// Read the full response, mapping non-2xx bodies to the canonical envelope.
pub async fn expect_success(
    response: reqwest::Response,
    provider: &str,
) -> Result<(StatusCode, reqwest::header::HeaderMap, bytes::Bytes), AppError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(map_upstream_error(status, &body, provider));
    }
    Ok((status, headers, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    fn target_with_model(model: &str) -> ProviderTarget {
        let mut headers = HeaderMap::new();
        headers.insert("x-bg-aws-region", HeaderValue::from_static("us-east-1"));
        headers.insert("x-bg-aws-access-key-id", HeaderValue::from_static("AKIA"));
        headers.insert(
            "x-bg-aws-secret-access-key",
            HeaderValue::from_static("secret"),
        );
        headers.insert("x-bg-aws-s3-bucket", HeaderValue::from_static("mybucket"));
        headers.insert(
            "x-bg-aws-bedrock-model",
            HeaderValue::from_str(model).unwrap(),
        );
        ProviderTarget::from_headers(&headers).unwrap()
    }

    #[test]
    fn test_converse_chat_endpoint_encodes_model_id() {
        let target = target_with_model("anthropic.claude-3-sonnet-20240229-v1:0");
        let ep = endpoint(Operation::ChatComplete { stream: false }, &target, None).unwrap();
        assert_eq!(ep.method, Method::POST);
        assert_eq!(ep.service, "bedrock-runtime");
        assert_eq!(
            ep.url.as_str(),
            "https://bedrock-runtime.us-east-1.amazonaws.com/model/anthropic.claude-3-sonnet-20240229-v1%3A0/converse"
        );

        let streaming = endpoint(Operation::ChatComplete { stream: true }, &target, None).unwrap();
        assert!(streaming.url.path().ends_with("/converse-stream"));
    }

    #[test]
    fn test_invoke_only_model_uses_invoke_path() {
        let target = target_with_model("cohere.command-text-v14");
        let ep = endpoint(Operation::ChatComplete { stream: false }, &target, None).unwrap();
        assert!(ep.url.path().ends_with("/invoke"));

        let streaming = endpoint(Operation::ChatComplete { stream: true }, &target, None).unwrap();
        assert!(streaming.url.path().ends_with("/invoke-with-response-stream"));
    }

    #[test]
    fn test_batch_endpoints() {
        let target = target_with_model("anthropic.claude-3-haiku-20240307-v1:0");

        let create = endpoint(Operation::CreateBatch, &target, None).unwrap();
        assert_eq!(create.method, Method::POST);
        assert_eq!(
            create.url.as_str(),
            "https://bedrock.us-east-1.amazonaws.com/model-invocation-job"
        );

        let arn = "arn:aws:bedrock:us-east-1:123456789012:model-invocation-job/abc123";
        let retrieve = endpoint(Operation::RetrieveBatch, &target, Some(arn)).unwrap();
        assert_eq!(retrieve.method, Method::GET);
        assert!(retrieve.url.path().starts_with("/model-invocation-job/"));

        let cancel = endpoint(Operation::CancelBatch, &target, Some(arn)).unwrap();
        assert!(cancel.url.path().ends_with("/stop"));

        let list = endpoint(Operation::ListBatches, &target, None).unwrap();
        assert!(list.url.path().ends_with("/model-invocation-jobs"));
    }

    #[test]
    fn test_fine_tune_endpoints_symmetric() {
        let target = target_with_model("anthropic.claude-3-haiku-20240307-v1:0");
        let create = endpoint(Operation::CreateFineTune, &target, None).unwrap();
        assert!(create.url.path().ends_with("/model-customization-job"));
        let list = endpoint(Operation::ListFineTunes, &target, None).unwrap();
        assert!(list.url.path().ends_with("/model-customization-jobs"));
    }

    #[test]
    fn test_file_attributes_endpoint_scenario_e() {
        let target = target_with_model("anthropic.claude-3-haiku-20240307-v1:0");
        let ep = endpoint(Operation::RetrieveFile, &target, Some("obj.jsonl")).unwrap();
        assert_eq!(
            ep.url.as_str(),
            "https://mybucket.s3.us-east-1.amazonaws.com/obj.jsonl?attributes"
        );
    }

    #[test]
    fn test_unsupported_operations_fail_before_upstream() {
        let target = target_with_model("anthropic.claude-3-haiku-20240307-v1:0");
        let err = endpoint(Operation::ListFiles, &target, None).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            err.envelope().error.message,
            "listFiles is not supported by Bedrock"
        );

        let err = endpoint(Operation::DeleteFile, &target, None).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unknown_model_rejected() {
        let target = target_with_model("openai.gpt-4");
        assert!(matches!(
            endpoint(Operation::ChatComplete { stream: false }, &target, None),
            Err(AppError::Validation(_))
        ));
    }
}
