use crate::{
    error::AppError,
    models::openai::CompletionRequest,
    operations::{self, expect_success, Operation},
    providers::{family::ModelFamily, invoke},
    streaming::{self, InvokeTranslator, SseShape, StreamTranslator},
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

/// Handle `POST /v1/completions`. Text completions always take the invoke
/// path; the prompt is rendered into the model's native dialect.
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let mut target = ProviderTarget::from_headers(&headers)?;

    let request: CompletionRequest = serde_json::from_value(body.clone())
        .map_err(|e| AppError::Validation(format!("invalid completion request: {}", e)))?;

    let model = request.model.clone();
    if target.model.is_none() {
        target.model = Some(model.clone());
    }
    let is_stream = request.stream.unwrap_or(false);

    tracing::info!(model = %model, stream = is_stream, "Handling completion request");

    let family = ModelFamily::detect(&model)
        .ok_or_else(|| AppError::Validation(format!("unrecognised Bedrock model '{}'", model)))?;

    // Anthropic invoke bodies are message-shaped; fold the raw prompt into a
    // single user turn.
    let mut body = body;
    if family == ModelFamily::Anthropic && body.get("messages").is_none() {
        let prompt = match &request.prompt {
            crate::models::openai::PromptInput::Single(s) => s.clone(),
            crate::models::openai::PromptInput::Many(parts) => parts.join("\n"),
        };
        body["messages"] = serde_json::json!([{"role": "user", "content": prompt}]);
    }

    let provider_body = invoke::chat_request_body(family, &body, &target)?;
    let endpoint = operations::endpoint(Operation::Complete { stream: is_stream }, &target, None)?;
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
        let translator: Box<dyn StreamTranslator> = Box::new(InvokeTranslator::new(
            family,
            &model,
            target.strict_openai_compliance,
        )?);
        Ok(streaming::sse_response(response, translator, SseShape::TextCompletion).into_response())
    } else {
        let (_, response_headers, bytes) = expect_success(response, &target.provider).await?;
        let provider_json: Value = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::InvalidProviderResponse(format!("provider returned non-JSON body: {}", e))
        })?;
        let canonical =
            invoke::transform_completion_response(family, &provider_json, &response_headers, &model)?;
        Ok(Json(canonical).into_response())
    }
}
