//! S3 multipart upload with on-the-fly JSONL rewriting.
//!
//! Parts are uploaded in strictly increasing part-number order; part N+1 is
//! not initiated until part N has a confirmed ETag. Transformed output is
//! buffered to 1 MiB part boundaries so the bridge never holds more than one
//! part in memory.

use crate::error::AppError;
use crate::operations::{encode_key, expect_success, s3_base, send_signed, Endpoint};
use crate::sigv4::Credentials;
use crate::target::ProviderTarget;
use reqwest::Method;
use std::time::Duration;

/// Part buffer threshold.
pub const PART_SIZE: usize = 1024 * 1024;

/// One in-flight multipart upload session.
pub struct MultipartUpload {
    client: reqwest::Client,
    region: String,
    creds: Credentials,
    base_url: String,
    key: String,
    upload_id: String,
    parts: Vec<(u32, String)>,
    buf: Vec<u8>,
    total_bytes: u64,
    timeout: Duration,
}

impl MultipartUpload {
    /// `POST /{key}?uploads` — returns the session once S3 hands back an
    /// UploadId. KMS directives from the target are signed into the initiate
    /// request.
    pub async fn initiate(
        client: &reqwest::Client,
        target: &ProviderTarget,
        creds: &Credentials,
        key: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let bucket = target.require_bucket()?;
        let base_url = s3_base(target, bucket);
        let url = url::Url::parse(&format!("{}/{}?uploads", base_url, encode_key(key)))
            .map_err(|e| AppError::Internal(format!("invalid S3 URL: {}", e)))?;

        let mut extra_headers = Vec::new();
        if let Some(sse) = &target.sse {
            extra_headers.push((
                "x-amz-server-side-encryption".to_string(),
                sse.mode.clone(),
            ));
            if let Some(key_id) = &sse.kms_key_id {
                extra_headers.push((
                    "x-amz-server-side-encryption-aws-kms-key-id".to_string(),
                    key_id.clone(),
                ));
            }
        }

        let endpoint = Endpoint {
            method: Method::POST,
            service: "s3",
            url,
        };
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
        let (_, _, body) = expect_success(response, &target.provider).await?;

        let upload_id = crate::xml_utils::first_tag_text(&body, "UploadId").ok_or_else(|| {
            AppError::InvalidProviderResponse(
                "InitiateMultipartUpload response missing UploadId".to_string(),
            )
        })?;

        tracing::debug!(key = %key, upload_id = %upload_id, "Initiated multipart upload");

        Ok(Self {
            client: client.clone(),
            region: target.region.clone(),
            creds: creds.clone(),
            base_url,
            key: key.to_string(),
            upload_id,
            parts: Vec::new(),
            buf: Vec::new(),
            total_bytes: 0,
            timeout,
        })
    }

    /// Number of bytes accepted so far (transformed size).
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Buffer transformed output, flushing full 1 MiB parts as they fill.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), AppError> {
        self.buf.extend_from_slice(data);
        self.total_bytes += data.len() as u64;
        while self.buf.len() >= PART_SIZE {
            let part: Vec<u8> = self.buf.drain(..PART_SIZE).collect();
            self.flush_part(part).await?;
        }
        Ok(())
    }

    /// `PUT /{key}?partNumber=N&uploadId=U` with the raw part bytes.
    async fn flush_part(&mut self, part: Vec<u8>) -> Result<(), AppError> {
        let part_number = self.parts.len() as u32 + 1;
        let url = url::Url::parse(&format!(
            "{}/{}?partNumber={}&uploadId={}",
            self.base_url,
            encode_key(&self.key),
            part_number,
            urlencoding::encode(&self.upload_id),
        ))
        .map_err(|e| AppError::Internal(format!("invalid S3 URL: {}", e)))?;

        let endpoint = Endpoint {
            method: Method::PUT,
            service: "s3",
            url,
        };
        let response = send_signed(
            &self.client,
            &self.creds,
            &endpoint,
            &self.region,
            &[],
            part,
            self.timeout,
        )
        .await?;

        let status = response.status();
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(crate::error::map_upstream_error(status, &body, "bedrock"));
        }
        let etag = etag.ok_or_else(|| {
            AppError::InvalidProviderResponse("UploadPart response missing ETag".to_string())
        })?;

        tracing::debug!(part_number, etag = %etag, "Uploaded part");
        self.parts.push((part_number, etag));
        Ok(())
    }

    /// Flush the remainder and `POST /{key}?uploadId=U` with the ordered
    /// parts manifest. Completion requires at least one part.
    pub async fn complete(mut self) -> Result<u64, AppError> {
        if !self.buf.is_empty() {
            let part = std::mem::take(&mut self.buf);
            self.flush_part(part).await?;
        }
        if self.parts.is_empty() {
            self.abort().await;
            return Err(AppError::Validation(
                "uploaded file contains no data".to_string(),
            ));
        }

        let manifest = crate::xml_utils::complete_multipart_upload_body(&self.parts);
        let url = url::Url::parse(&format!(
            "{}/{}?uploadId={}",
            self.base_url,
            encode_key(&self.key),
            urlencoding::encode(&self.upload_id),
        ))
        .map_err(|e| AppError::Internal(format!("invalid S3 URL: {}", e)))?;

        let endpoint = Endpoint {
            method: Method::POST,
            service: "s3",
            url,
        };
        let extra_headers = vec![("content-type".to_string(), "application/xml".to_string())];
        let response = send_signed(
            &self.client,
            &self.creds,
            &endpoint,
            &self.region,
            &extra_headers,
            manifest.into_bytes(),
            self.timeout,
        )
        .await?;
        expect_success(response, "bedrock").await?;

        tracing::info!(
            key = %self.key,
            parts = self.parts.len(),
            bytes = self.total_bytes,
            "Completed multipart upload"
        );
        Ok(self.total_bytes)
    }

    /// `DELETE /{key}?uploadId=U`. Best effort: failures are logged, never
    /// surfaced, since abort already runs on an error path.
    pub async fn abort(self) {
        let url = match url::Url::parse(&format!(
            "{}/{}?uploadId={}",
            self.base_url,
            encode_key(&self.key),
            urlencoding::encode(&self.upload_id),
        )) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "Could not build abort URL");
                return;
            }
        };

        let endpoint = Endpoint {
            method: Method::DELETE,
            service: "s3",
            url,
        };
        match send_signed(
            &self.client,
            &self.creds,
            &endpoint,
            &self.region,
            &[],
            Vec::new(),
            self.timeout,
        )
        .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(upload_id = %self.upload_id, "Aborted multipart upload");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "AbortMultipartUpload failed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "AbortMultipartUpload failed");
            }
        }
    }

    #[cfg(test)]
    pub fn parts(&self) -> &[(u32, String)] {
        &self.parts
    }
}
