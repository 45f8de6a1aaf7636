use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Canonical error envelope returned to gateway clients.
///
/// Shape: `{"error": {"message", "type", "code", "param"}, "provider": "bedrock"}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                error_type: None,
                code: None,
                param: None,
            },
            provider: Some(provider.into()),
        }
    }

    pub fn with_code(mut self, code: Value) -> Self {
        self.error.code = Some(code);
        self
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error.error_type = Some(error_type.into());
        self
    }
}

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Canonical request fails schema or field constraints. No upstream call made.
    Validation(String),
    /// Operation not implemented for the selected provider. No upstream call made.
    UnsupportedOperation { operation: String, provider: String },
    /// Missing keys, STS denial, expired session.
    Credential(String),
    /// Non-2xx from provider, already mapped to the canonical envelope.
    Upstream {
        status: StatusCode,
        envelope: ErrorEnvelope,
    },
    /// Provider returned a 2xx body that does not match the expected schema.
    InvalidProviderResponse(String),
    /// Malformed frame mid-stream (surfaced in-band by the translator).
    Stream(String),
    /// Upstream did not answer in time.
    Timeout(String),
    /// Client disconnect, upload part failure.
    Io(String),
    /// Internal invariant violation.
    Internal(String),
    /// HTTP request error (preserves reqwest::Error for timeout detection)
    HttpRequest(reqwest::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
            Self::UnsupportedOperation {
                operation,
                provider,
            } => write!(f, "{} is not supported by {}", operation, provider),
            Self::Credential(msg) => write!(f, "Credential error: {}", msg),
            Self::Upstream { status, envelope } => {
                write!(f, "Upstream error ({}): {}", status, envelope.error.message)
            }
            Self::InvalidProviderResponse(msg) => {
                write!(f, "Invalid provider response: {}", msg)
            }
            Self::Stream(msg) => write!(f, "Stream error: {}", msg),
            Self::Timeout(msg) => write!(f, "Upstream timeout: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
            Self::HttpRequest(err) => write!(f, "HTTP request error: {}", err),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn unsupported(operation: &str, provider: &str) -> Self {
        Self::UnsupportedOperation {
            operation: operation.to_string(),
            provider: capitalize(provider),
        }
    }

    /// Status code this error renders as.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedOperation { .. } => StatusCode::NOT_FOUND,
            Self::Credential(_) => StatusCode::UNAUTHORIZED,
            Self::Upstream { status, .. } => *status,
            Self::InvalidProviderResponse(_) => StatusCode::BAD_GATEWAY,
            Self::Stream(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Io(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::HttpRequest(err) => {
                if err.is_timeout() {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
        }
    }

    /// Canonical envelope this error renders as.
    pub fn envelope(&self) -> ErrorEnvelope {
        match self {
            Self::Upstream { envelope, .. } => envelope.clone(),
            Self::UnsupportedOperation {
                operation,
                provider,
            } => ErrorEnvelope::new(
                format!("{} is not supported by {}", operation, provider),
                provider.to_lowercase(),
            )
            .with_code(json!(404)),
            Self::Credential(msg) => {
                ErrorEnvelope::new(msg.clone(), "bedrock").with_type("authentication_error")
            }
            other => {
                let mut envelope = ErrorEnvelope::new(other.to_string(), "bedrock");
                envelope.error.error_type = Some(error_type_name(other).to_string());
                envelope
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = self.envelope();
        tracing::debug!(status = %status, message = %envelope.error.message, "Returning error response");
        (status, Json(envelope)).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::Validation(_) => "invalid_request_error",
        AppError::UnsupportedOperation { .. } => "invalid_request_error",
        AppError::Credential(_) => "authentication_error",
        AppError::Upstream { .. } => "upstream_error",
        AppError::InvalidProviderResponse(_) => "invalid_provider_response",
        AppError::Stream(_) => "stream_error",
        AppError::Timeout(_) => "timeout_error",
        AppError::Io(_) => "io_error",
        AppError::Internal(_) => "internal_error",
        AppError::HttpRequest(_) => "http_request_error",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Map a non-2xx provider response body to the canonical envelope.
///
/// Recognises Bedrock JSON errors (`{"message": …}`), S3 XML errors
/// (`<Code>…</Code><Message>…</Message>`), and SigV4 denials. Anything else is
/// surfaced as the stringified body with the HTTP status as `code`.
pub fn map_upstream_error(status: StatusCode, body: &[u8], provider: &str) -> AppError {
    let text = String::from_utf8_lossy(body);

    let mut envelope = if let Ok(json_body) = serde_json::from_slice::<Value>(body) {
        match json_body.get("message").and_then(Value::as_str) {
            Some(message) => ErrorEnvelope::new(message, provider),
            None => ErrorEnvelope::new(text.to_string(), provider)
                .with_code(json!(status.as_u16())),
        }
    } else if text.trim_start().starts_with('<') {
        let code = crate::xml_utils::first_tag_text(body, "Code");
        let message = crate::xml_utils::first_tag_text(body, "Message")
            .unwrap_or_else(|| text.to_string());
        let mut env = ErrorEnvelope::new(message, provider);
        env.error.code = code.map(Value::String);
        env
    } else {
        ErrorEnvelope::new(text.to_string(), provider).with_code(json!(status.as_u16()))
    };

    if status == StatusCode::FORBIDDEN {
        envelope.error.error_type = Some("authentication_error".to_string());
    }

    AppError::Upstream { status, envelope }
}

// Conversions from common error types
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::HttpRequest(err)
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}

impl From<crate::transform::TransformError> for AppError {
    fn from(err: crate::transform::TransformError) -> Self {
        Self::Validation(err.to_string())
    }
}
