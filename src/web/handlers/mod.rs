use axum::Json;

pub mod channels;
pub mod subscribe;
pub mod vod;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}
