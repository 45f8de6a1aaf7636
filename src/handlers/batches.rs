use crate::{
    bedrock::jobs,
    error::AppError,
    models::jobs::CreateBatchRequest,
    operations::{self, expect_success, Operation},
    s3::{self, download},
    target::ProviderTarget,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap},
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

/// Handle `POST /v1/batches`: create the model-invocation job, then read it
/// back once so the caller sees the full record rather than a bare ARN.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateBatchRequest>,
) -> Result<Response, AppError> {
    let target = ProviderTarget::from_headers(&headers)?;
    tracing::info!(input_file_id = %request.input_file_id, "Creating batch job");

    let body = jobs::create_batch_body(&request, &target)?;
    let created =
        call_control_plane(&state, &target, Operation::CreateBatch, None, Some(body)).await?;
    let arn = created["jobArn"].as_str().ok_or_else(|| {
        AppError::InvalidProviderResponse("CreateModelInvocationJob returned no jobArn".to_string())
    })?;

    let fetched =
        call_control_plane(&state, &target, Operation::RetrieveBatch, Some(arn), None).await?;
    Ok(Json(jobs::parse_batch(&fetched)?).into_response())
}

/// Handle `GET /v1/batches/{id}`.
pub async fn retrieve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let target = ProviderTarget::from_headers(&headers)?;
    let fetched =
        call_control_plane(&state, &target, Operation::RetrieveBatch, Some(&id), None).await?;
    Ok(Json(jobs::parse_batch(&fetched)?).into_response())
}

/// Handle `GET /v1/batches`.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let target = ProviderTarget::from_headers(&headers)?;
    let fetched = call_control_plane(&state, &target, Operation::ListBatches, None, None).await?;
    Ok(Json(jobs::parse_batch_list(&fetched)?).into_response())
}

/// Handle `POST /v1/batches/{id}/cancel`. After asking Bedrock to stop, the
/// job is read back once so the reported state is what AWS actually holds,
/// not an optimistic "cancelled".
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let target = ProviderTarget::from_headers(&headers)?;
    tracing::info!(job = %id, "Cancelling batch job");

    call_control_plane(&state, &target, Operation::CancelBatch, Some(&id), None).await?;
    let fetched =
        call_control_plane(&state, &target, Operation::RetrieveBatch, Some(&id), None).await?;
    Ok(Json(jobs::parse_batch(&fetched)?).into_response())
}

/// Handle `GET /v1/batches/{id}/output`: resolve the job's output location
/// and stream the object through the batch-output row rewrite as NDJSON.
pub async fn output(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let mut target = ProviderTarget::from_headers(&headers)?;

    let fetched =
        call_control_plane(&state, &target, Operation::RetrieveBatch, Some(&id), None).await?;
    let output_uri = fetched["outputDataConfig"]["s3OutputDataConfig"]["s3Uri"]
        .as_str()
        .ok_or_else(|| {
            AppError::InvalidProviderResponse("job has no output data config".to_string())
        })?;

    let (bucket, key) = s3::split_s3_uri(output_uri)?;
    // Job output prefixes end with '/'; the transformed rows live in a
    // single object below it.
    let key = if key.ends_with('/') {
        format!("{}output.jsonl", key)
    } else {
        key.to_string()
    };
    target.s3_bucket = Some(bucket.to_string());

    let creds = state.credentials.resolve(&target).await?;
    let response = download::fetch_object(
        &state.http_client,
        &target,
        &creds,
        &key,
        state.upstream_timeout(),
    )
    .await?;

    let stream = download::rewrite_ndjson_stream(response, target);
    Ok((
        [(header::CONTENT_TYPE, "application/jsonl")],
        Body::from_stream(stream),
    )
        .into_response())
}
