use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn healthcheck(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "available",
        "environment": state.config.env,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
