use std::sync::Arc;

use axum::{extract::Extension, routing::get, Json, Router};
use serde_json::json;

use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/tasks", get(list_tasks))
}

/// Registered tasks with their schedule and runtime counters.
pub async fn list_tasks(Extension(services): Extension<Arc<AppServices>>) -> Json<serde_json::Value> {
    Json(json!({
        "running": services.manager.is_running(),
        "tasks": services.manager.snapshot(),
    }))
}
