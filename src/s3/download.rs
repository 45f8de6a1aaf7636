//! S3 object retrieval: metadata reads and streamed content with per-line
//! batch-output rewriting.

use crate::error::AppError;
use crate::models::jobs::FileObject;
use crate::operations::{self, expect_success, send_signed, Operation};
use crate::s3::jsonl::transform_output_line;
use crate::sigv4::Credentials;
use crate::streaming::NdjsonFramer;
use crate::target::ProviderTarget;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::time::Duration;

/// `GET /{key}?attributes` with `x-amz-object-attributes: ObjectSize` →
/// canonical file object. `created_at` comes from the Last-Modified header.
pub async fn fetch_attributes(
    client: &reqwest::Client,
    target: &ProviderTarget,
    creds: &Credentials,
    key: &str,
    timeout: Duration,
) -> Result<FileObject, AppError> {
    let endpoint = operations::endpoint(Operation::RetrieveFile, target, Some(key))?;
    let extra_headers = vec![(
        "x-amz-object-attributes".to_string(),
        "ObjectSize".to_string(),
    )];

    let response = send_signed(
        client,
        creds,
        &endpoint,
        &target.region,
        &extra_headers,
        Vec::new(),
        timeout,
    )
    .await?;
    let (_, headers, body) = expect_success(response, &target.provider).await?;

    let bytes = crate::xml_utils::first_tag_text(&body, "ObjectSize")
        .and_then(|size| size.parse().ok())
        .ok_or_else(|| {
            AppError::InvalidProviderResponse(
                "GetObjectAttributes response missing ObjectSize".to_string(),
            )
        })?;

    let created_at = headers
        .get("last-modified")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| chrono::DateTime::parse_from_rfc2822(raw).ok())
        .map(|t| t.timestamp())
        .unwrap_or(0);

    let uri = format!("s3://{}/{}", target.require_bucket()?, key);
    Ok(FileObject {
        id: crate::s3::file_id_from_s3_uri(&uri),
        object: "file".to_string(),
        bytes,
        created_at,
        filename: uri,
        purpose: target
            .file_purpose
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "batch".to_string()),
        status: "processed".to_string(),
    })
}

/// Signed `GET /{key}`; non-2xx responses are mapped to the canonical
/// envelope before any body bytes reach the caller.
pub async fn fetch_object(
    client: &reqwest::Client,
    target: &ProviderTarget,
    creds: &Credentials,
    key: &str,
    timeout: Duration,
) -> Result<reqwest::Response, AppError> {
    let endpoint = operations::endpoint(Operation::RetrieveFileContent, target, Some(key))?;
    let response = send_signed(
        client,
        creds,
        &endpoint,
        &target.region,
        &[],
        Vec::new(),
        timeout,
    )
    .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        return Err(crate::error::map_upstream_error(
            status,
            &body,
            &target.provider,
        ));
    }
    Ok(response)
}

/// Stream an object body through the per-line batch-output rewrite. Rows
/// that are not batch output pass through unchanged, so the transform is the
/// identity for ordinary JSONL objects.
pub fn rewrite_ndjson_stream(
    response: reqwest::Response,
    target: ProviderTarget,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    struct LineState {
        framer: NdjsonFramer,
        target: ProviderTarget,
    }

    let state = LineState {
        framer: NdjsonFramer::new(),
        target,
    };

    response
        .bytes_stream()
        .map(Some)
        .chain(futures::stream::iter([None]))
        .scan(state, |state, item| {
            let out = match item {
                Some(Ok(bytes)) => {
                    let mut text = String::new();
                    for line in state.framer.push(&bytes) {
                        text.push_str(&transform_output_line(&line, &state.target));
                        text.push('\n');
                    }
                    Some(Ok(Bytes::from(text)))
                }
                Some(Err(e)) => Some(Err(std::io::Error::other(e))),
                None => state.framer.finish().map(|tail| {
                    let mut text = transform_output_line(&tail, &state.target);
                    text.push('\n');
                    Ok(Bytes::from(text))
                }),
            };
            futures::future::ready(Some(out))
        })
        .filter_map(|item| futures::future::ready(item))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_modified_parse() {
        let t = chrono::DateTime::parse_from_rfc2822("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        assert_eq!(t.timestamp(), 1_704_067_200);
    }
}
