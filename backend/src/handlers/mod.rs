pub mod automations;

pub use automations::{automation_routes, event_routes};

use axum::{Json, extract::State, http::StatusCode};
use std::sync::Arc;

use crate::AppState;

pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = crate::database::health_check(&state.db_pool).await;
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "database": db_ok,
        })),
    )
}
