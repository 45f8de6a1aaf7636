use crate::{
    error::AppError,
    models::jobs::FileObject,
    s3::{
        self, download,
        form::{boundary_from_content_type, BoundaryScanner, FormEvent},
        jsonl::{transform_upload_line, UploadKind},
        upload::MultipartUpload,
    },
    target::{FilePurpose, ProviderTarget},
};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;

use super::AppState;

/// Handle `POST /v1/files` (multipart form upload).
///
/// The file part streams through the boundary scanner, each complete JSONL
/// line is rewritten for the target purpose, and the transformed bytes are
/// multipart-uploaded to S3 in 1 MiB parts. Any failure aborts the S3 upload
/// best-effort so no partial object is committed.
pub async fn upload(State(state): State<AppState>, request: Request) -> Result<Response, AppError> {
    let headers = request.headers().clone();
    let target = ProviderTarget::from_headers(&headers)?;

    let boundary = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(boundary_from_content_type)
        .ok_or_else(|| {
            AppError::Validation("expected multipart/form-data with a boundary".to_string())
        })?;

    let mut upload_slot: Option<MultipartUpload> = None;
    let result = run_upload(&state, target, &boundary, request, &mut upload_slot).await;

    match result {
        Ok(file) => Ok(Json(file).into_response()),
        Err(e) => {
            if let Some(upload) = upload_slot.take() {
                tracing::warn!(upload_id = %upload.upload_id(), "Aborting multipart upload after error");
                upload.abort().await;
            }
            Err(e)
        }
    }
}

async fn run_upload(
    state: &AppState,
    mut target: ProviderTarget,
    boundary: &str,
    request: Request,
    upload_slot: &mut Option<MultipartUpload>,
) -> Result<FileObject, AppError> {
    let mut scanner = BoundaryScanner::new(boundary);
    let mut body = request.into_body().into_data_stream();

    let mut kind: Option<UploadKind> = None;
    let mut filename = String::new();
    let mut key = String::new();
    let mut line_buf: Vec<u8> = Vec::new();
    let mut rows: u64 = 0;
    let mut file_seen = false;
    let mut file_done = false;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| AppError::Io(format!("reading upload body: {}", e)))?;
        for event in scanner.push(&chunk)? {
            match event {
                FormEvent::Field { name, value } => {
                    // OpenAI clients send purpose as a form field; the header
                    // wins when both are present.
                    if name == "purpose" && target.file_purpose.is_none() {
                        target.file_purpose = FilePurpose::parse(&value);
                    }
                }
                FormEvent::FileStart { filename: name, .. } => {
                    if file_seen {
                        return Err(AppError::Validation(
                            "upload must contain exactly one file part".to_string(),
                        ));
                    }
                    file_seen = true;

                    if !name.ends_with(".jsonl") {
                        return Err(AppError::Validation(format!(
                            "'{}' is not a JSONL file",
                            name
                        )));
                    }
                    let upload_kind = UploadKind::from_target(&target)?;
                    kind = Some(upload_kind);
                    key = target.s3_object_key.clone().unwrap_or_else(|| name.clone());
                    filename = name;

                    tracing::info!(filename = %filename, key = %key, ?upload_kind, "Starting file upload");

                    let creds = state.credentials.resolve(&target).await?;
                    *upload_slot = Some(
                        MultipartUpload::initiate(
                            &state.http_client,
                            &target,
                            &creds,
                            &key,
                            state.upstream_timeout(),
                        )
                        .await?,
                    );
                }
                FormEvent::FileChunk(bytes) => {
                    let upload = upload_slot.as_mut().ok_or_else(|| {
                        AppError::Internal("file chunk before file start".to_string())
                    })?;
                    line_buf.extend_from_slice(&bytes);
                    while let Some(pos) = line_buf.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = line_buf.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line[..line.len() - 1]);
                        let line = line.trim_end_matches('\r').trim();
                        if line.is_empty() {
                            continue;
                        }
                        let upload_kind = kind.ok_or_else(|| {
                            AppError::Internal("file chunk before file start".to_string())
                        })?;
                        let out = transform_upload_line(upload_kind, line, &target)?;
                        upload.write(out.as_bytes()).await?;
                        rows += 1;
                    }
                }
                FormEvent::FileEnd => {
                    // Trailing line without a newline terminator
                    let tail = String::from_utf8_lossy(&line_buf).trim().to_string();
                    line_buf.clear();
                    if !tail.is_empty() {
                        let upload = upload_slot.as_mut().ok_or_else(|| {
                            AppError::Internal("file end before file start".to_string())
                        })?;
                        let upload_kind = kind.ok_or_else(|| {
                            AppError::Internal("file end before file start".to_string())
                        })?;
                        let out = transform_upload_line(upload_kind, &tail, &target)?;
                        upload.write(out.as_bytes()).await?;
                        rows += 1;
                    }
                    file_done = true;
                }
            }
        }
    }

    scanner.finish()?;
    if !file_seen || !file_done {
        return Err(AppError::Validation(
            "multipart body contained no file part".to_string(),
        ));
    }

    let upload = upload_slot
        .take()
        .ok_or_else(|| AppError::Internal("upload session missing".to_string()))?;
    let bytes = upload.complete().await?;

    let uri = format!("s3://{}/{}", target.require_bucket()?, key);
    tracing::info!(uri = %uri, rows, bytes, "Uploaded transformed file");

    Ok(FileObject {
        id: s3::file_id_from_s3_uri(&uri),
        object: "file".to_string(),
        bytes,
        created_at: chrono::Utc::now().timestamp(),
        filename,
        purpose: target
            .file_purpose
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "batch".to_string()),
        status: "processed".to_string(),
    })
}

/// Handle `GET /v1/files/{id}`: object attributes → canonical file object.
pub async fn retrieve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let mut target = ProviderTarget::from_headers(&headers)?;

    let uri = s3::s3_uri_from_file_id(&id)?;
    let (bucket, key) = s3::split_s3_uri(&uri)?;
    let key = key.to_string();
    target.s3_bucket = Some(bucket.to_string());

    let creds = state.credentials.resolve(&target).await?;
    let file = download::fetch_attributes(
        &state.http_client,
        &target,
        &creds,
        &key,
        state.upstream_timeout(),
    )
    .await?;
    Ok(Json(file).into_response())
}

/// Handle `GET /v1/files/{id}/content`: stream the object as NDJSON, with
/// batch output rows rewritten to the canonical per-row shape.
pub async fn content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let mut target = ProviderTarget::from_headers(&headers)?;

    let uri = s3::s3_uri_from_file_id(&id)?;
    let (bucket, key) = s3::split_s3_uri(&uri)?;
    let key = key.to_string();
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

/// Handle `GET /v1/files`. Bedrock has no file listing; this fails with the
/// deterministic envelope and never calls upstream.
pub async fn list(headers: HeaderMap) -> Result<Response, AppError> {
    Err(AppError::unsupported("listFiles", provider_name(&headers)))
}

/// Handle `DELETE /v1/files/{id}`. Same deterministic rejection.
pub async fn delete(Path(_id): Path<String>, headers: HeaderMap) -> Result<Response, AppError> {
    Err(AppError::unsupported("deleteFile", provider_name(&headers)))
}

fn provider_name(headers: &HeaderMap) -> &str {
    headers
        .get("x-bg-provider")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("bedrock")
}
