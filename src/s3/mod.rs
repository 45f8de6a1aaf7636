pub mod download;
pub mod form;
pub mod jsonl;
pub mod upload;

use crate::error::AppError;

/// Canonical file id for an S3 object: the URL-encoded `s3://` URI.
pub fn file_id_from_s3_uri(uri: &str) -> String {
    urlencoding::encode(uri).into_owned()
}

/// Decode a canonical file id back into an `s3://` URI.
pub fn s3_uri_from_file_id(id: &str) -> Result<String, AppError> {
    let uri = urlencoding::decode(id)
        .map_err(|e| AppError::Validation(format!("invalid file id encoding: {}", e)))?
        .into_owned();
    if !uri.starts_with("s3://") {
        return Err(AppError::Validation(format!(
            "file id '{}' is not an s3:// URI",
            id
        )));
    }
    Ok(uri)
}

/// Split an `s3://bucket/key` URI into (bucket, key).
pub fn split_s3_uri(uri: &str) -> Result<(&str, &str), AppError> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| AppError::Validation(format!("'{}' is not an s3:// URI", uri)))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| AppError::Validation(format!("'{}' has no object key", uri)))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(AppError::Validation(format!("'{}' has no object key", uri)));
    }
    Ok((bucket, key))
}
