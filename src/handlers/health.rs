use axum::Json;
use serde_json::{json, Value};

/// Liveness probe. Carries no provider traffic.
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
