use crate::{
    error::AppError,
    models::openai::ChatCompletionRequest,
    operations::{self, expect_success, Operation},
    providers::{converse, family::ModelFamily, invoke},
    streaming::{self, ConverseTranslator, InvokeTranslator, SseShape, StreamTranslator},
    target::ProviderTarget,
};
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use super::AppState;

/// Handle `POST /v1/chat/completions`.
///
/// Converse-eligible models go through the unified Converse transform;
/// invoke-only models take their family-specific payload and prompt dialect.
/// `stream: true` switches the response to canonical SSE.
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let mut target = ProviderTarget::from_headers(&headers)?;

    // Schema validation before any transform work
    let request: ChatCompletionRequest = serde_json::from_value(body.clone())
        .map_err(|e| AppError::Validation(format!("invalid chat request: {}", e)))?;
    if request.messages.is_empty() {
        return Err(AppError::Validation("messages must not be empty".to_string()));
    }

    let model = request.model.clone();
    if target.model.is_none() {
        target.model = Some(model.clone());
    }
    let is_stream = request.stream.unwrap_or(false);
    let strict = target.strict_openai_compliance;

    tracing::info!(
        model = %model,
        stream = is_stream,
        strict = strict,
        "Handling chat completion request"
    );

    let family = ModelFamily::detect(&model)
        .ok_or_else(|| AppError::Validation(format!("unrecognised Bedrock model '{}'", model)))?;
    let use_converse = family.converse_eligible(&model);

    let provider_body = if use_converse {
        converse::chat_request_config().apply(&body, &target)?
    } else {
        invoke::chat_request_body(family, &body, &target)?
    };

    let endpoint = operations::endpoint(Operation::ChatComplete { stream: is_stream }, &target, None)?;
    let creds = state.credentials.resolve(&target).await?;
    let content_type = vec![("content-type".to_string(), "application/json".to_string())];
    let response = operations::send_signed(
        &state.http_client,
        &creds,
        &endpoint,
        &target.region,
        &content_type,
        serde_json::to_vec(&provider_body)
            .map_err(|e| AppError::Internal(format!("serialising provider body: {}", e)))?,
        state.upstream_timeout(),
    )
    .await?;

    if is_stream {
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(crate::error::map_upstream_error(status, &body, &target.provider));
        }

        let translator: Box<dyn StreamTranslator> = if use_converse {
            Box::new(ConverseTranslator::new(&model, strict))
        } else {
            Box::new(InvokeTranslator::new(family, &model, strict)?)
        };
        Ok(streaming::sse_response(response, translator, SseShape::ChatCompletion).into_response())
    } else {
        let (_, response_headers, bytes) = expect_success(response, &target.provider).await?;
        let provider_json: Value = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::InvalidProviderResponse(format!("provider returned non-JSON body: {}", e))
        })?;

        let canonical = if use_converse {
            converse::transform_chat_response(&provider_json, &model, strict)?
        } else {
            invoke::transform_chat_response(family, &provider_json, &response_headers, &model)?
        };

        if let Some(usage) = &canonical.usage {
            tracing::info!(
                model = %model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completed chat completion request"
            );
        }
        Ok(Json(canonical).into_response())
    }
}
