use crate::{
    error::AppError,
    models::openai::EmbeddingsRequest,
    operations::{self, expect_success, Operation},
    providers::{embed, family::ModelFamily},
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

/// Handle `POST /v1/embeddings` (Titan and Cohere embedding models).
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let mut target = ProviderTarget::from_headers(&headers)?;

    let request: EmbeddingsRequest = serde_json::from_value(body.clone())
        .map_err(|e| AppError::Validation(format!("invalid embeddings request: {}", e)))?;

    let model = request.model.clone();
    if target.model.is_none() {
        target.model = Some(model.clone());
    }

    tracing::info!(model = %model, "Handling embeddings request");

    let family = ModelFamily::detect(&model)
        .ok_or_else(|| AppError::Validation(format!("unrecognised Bedrock model '{}'", model)))?;
    if !matches!(family, ModelFamily::TitanEmbed | ModelFamily::CohereEmbed) {
        return Err(AppError::Validation(format!(
            "'{}' is not an embedding model",
            model
        )));
    }

    let provider_body = embed::request_body(family, &body, &target)?;
    let endpoint = operations::endpoint(Operation::Embed, &target, None)?;
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

    let (_, response_headers, bytes) = expect_success(response, &target.provider).await?;
    let provider_json: Value = serde_json::from_slice(&bytes).map_err(|e| {
        AppError::InvalidProviderResponse(format!("provider returned non-JSON body: {}", e))
    })?;
    let canonical = embed::transform_response(family, &provider_json, &response_headers, &model)?;
    Ok(Json(canonical).into_response())
}
