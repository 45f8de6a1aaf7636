use crate::{
    bedrock::jobs,
    error::AppError,
    models::jobs::CreateFineTuningJobRequest,
    operations::{self, expect_success, Operation},
    target::ProviderTarget,
};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use super::AppState;

async fn call_control_plane(
    state: &AppState,
    target: &ProviderTarget,
    op: Operation,
    resource: Option<&str>,
    body: Option<Value>,
) -> Result<Value, AppError> {
    let endpoint = operations::endpoint(op, target, resource)?;
    let creds = state.credentials.resolve(target).await?;
    let payload = match &body {
        Some(body) => serde_json::to_vec(body)
            .map_err(|e| AppError::Internal(format!("serialising job body: {}", e)))?,
        None => Vec::new(),
    };
    let content_type = if body.is_some() {
        vec![("content-type".to_string(), "application/json".to_string())]
    } else {
        Vec::new()
    };

    let response = operations::send_signed(
        &state.http_client,
        &creds,
        &endpoint,
        &target.region,
        &content_type,
        payload,
        state.upstream_timeout(),
    )
    .await?;
    let (_, _, bytes) = expect_success(response, &target.provider).await?;

    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| {
        AppError::InvalidProviderResponse(format!("provider returned non-JSON body: {}", e))
    })
}

/// Handle `POST /v1/fine_tuning/jobs`.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateFineTuningJobRequest>,
) -> Result<Response, AppError> {
    let target = ProviderTarget::from_headers(&headers)?;
    tracing::info!(
        model = %request.model,
        training_file = %request.training_file,
        "Creating fine-tuning job"
    );

    let body = jobs::create_finetune_body(&request, &target)?;
    let created =
        call_control_plane(&state, &target, Operation::CreateFineTune, None, Some(body)).await?;
    let arn = created["jobArn"].as_str().ok_or_else(|| {
        AppError::InvalidProviderResponse(
            "CreateModelCustomizationJob returned no jobArn".to_string(),
        )
    })?;

    let fetched =
        call_control_plane(&state, &target, Operation::RetrieveFineTune, Some(arn), None).await?;
    Ok(Json(jobs::parse_finetune(&fetched)?).into_response())
}

/// Handle `GET /v1/fine_tuning/jobs/{id}`.
pub async fn retrieve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let target = ProviderTarget::from_headers(&headers)?;
    let fetched =
        call_control_plane(&state, &target, Operation::RetrieveFineTune, Some(&id), None).await?;
    Ok(Json(jobs::parse_finetune(&fetched)?).into_response())
}

/// Handle `GET /v1/fine_tuning/jobs`.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let target = ProviderTarget::from_headers(&headers)?;
    let fetched = call_control_plane(&state, &target, Operation::ListFineTunes, None, None).await?;
    Ok(Json(jobs::parse_finetune_list(&fetched)?).into_response())
}

/// Handle `POST /v1/fine_tuning/jobs/{id}/cancel`. Reads the job back after
/// the stop call so the reported state is authoritative.
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let target = ProviderTarget::from_headers(&headers)?;
    tracing::info!(job = %id, "Cancelling fine-tuning job");

    call_control_plane(&state, &target, Operation::CancelFineTune, Some(&id), None).await?;
    let fetched =
        call_control_plane(&state, &target, Operation::RetrieveFineTune, Some(&id), None).await?;
    Ok(Json(jobs::parse_finetune(&fetched)?).into_response())
}
