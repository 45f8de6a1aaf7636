use crate::{
    error::AppError,
    models::openai::ImageGenerationRequest,
    operations::{self, expect_success, Operation},
    providers::{family::ModelFamily, image},
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

/// Handle `POST /v1/images/generations` (Stability models).
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let mut target = ProviderTarget::from_headers(&headers)?;

    let request: ImageGenerationRequest = serde_json::from_value(body.clone())
        .map_err(|e| AppError::Validation(format!("invalid image request: {}", e)))?;

    let model = request
        .model
        .clone()
        .or_else(|| target.model.clone())
        .ok_or_else(|| {
            AppError::Validation("model is required for image generation".to_string())
        })?;
    if target.model.is_none() {
        target.model = Some(model.clone());
    }

    tracing::info!(model = %model, "Handling image generation request");

    let family = ModelFamily::detect(&model)
        .ok_or_else(|| AppError::Validation(format!("unrecognised Bedrock model '{}'", model)))?;
    if !matches!(family, ModelFamily::StabilityV1 | ModelFamily::StabilityV2) {
        return Err(AppError::Validation(format!(
            "'{}' is not an image generation model",
            model
        )));
    }

    let provider_body = image::request_body(family, &body, &target)?;
    let endpoint = operations::endpoint(Operation::GenerateImage, &target, None)?;
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

    let (_, _, bytes) = expect_success(response, &target.provider).await?;
    let provider_json: Value = serde_json::from_slice(&bytes).map_err(|e| {
        AppError::InvalidProviderResponse(format!("provider returned non-JSON body: {}", e))
    })?;
    let canonical = image::transform_response(family, &provider_json)?;
    Ok(Json(canonical).into_response())
}
