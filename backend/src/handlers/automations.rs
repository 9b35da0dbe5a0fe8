use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
};
use chrono::Utc;
use relay_shared::{AutomationDefinition, Node, NodeKind, TRIGGER_NODE_ID};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::automations::ExecutionRecord;
use crate::error::{ApiResult, AppError, ValidationBuilder};
use crate::events::DomainEvent;

#[derive(Serialize, Deserialize, Validate)]
pub struct AutomationCreate {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    pub nodes: Vec<Node>,
}

#[derive(Serialize, Deserialize, Validate)]
pub struct AutomationUpdate {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub nodes: Vec<Node>,
}

#[derive(Serialize, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Serialize, Deserialize)]
pub struct ExecutionQuery {
    pub automation_id: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Serialize, Deserialize)]
pub struct EventCreate {
    pub module: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_automations).post(create_automation))
        .route(
            "/:id",
            get(get_automation).put(update_automation).delete(delete_automation),
        )
        .route("/:id/activate", patch(set_active))
        .route("/executions", get(list_executions))
}

pub fn event_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(emit_event))
}

/// Graph shape rules the engine relies on: unique node ids and a trigger at
/// the entry node. Everything else (dead nodes, unknown types) is tolerated
/// at execution time.
fn validate_graph(nodes: &[Node]) -> Option<AppError> {
    let mut builder = ValidationBuilder::new();

    let mut seen = HashSet::new();
    for node in nodes {
        if !seen.insert(node.id.as_str()) {
            builder = builder.error("nodes", &format!("duplicate node id '{}'", node.id));
        }
    }

    match nodes.iter().find(|n| n.id == TRIGGER_NODE_ID) {
        None => {
            builder = builder.error(
                "nodes",
                &format!("entry node '{TRIGGER_NODE_ID}' is missing"),
            );
        }
        Some(node) => {
            if !matches!(node.kind, NodeKind::Trigger { .. }) {
                builder = builder.error(
                    "nodes",
                    &format!("entry node '{TRIGGER_NODE_ID}' must be a trigger"),
                );
            }
        }
    }

    builder.build()
}

async fn list_automations(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<AutomationDefinition>>> {
    let automations = state.definitions.list_all().await?;
    Ok(Json(automations))
}

async fn create_automation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AutomationCreate>,
) -> ApiResult<(StatusCode, Json<AutomationDefinition>)> {
    payload.validate()?;
    if let Some(error) = validate_graph(&payload.nodes) {
        return Err(error);
    }

    let definition = AutomationDefinition {
        id: Uuid::new_v4(),
        name: payload.name,
        description: payload.description,
        is_active: payload.is_active,
        nodes: payload.nodes,
        created_by: None,
        created_at: Utc::now(),
        updated_at: None,
    };

    state.definitions.create(&definition).await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

async fn get_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AutomationDefinition>> {
    use crate::automations::DefinitionStore;

    let automation = state
        .definitions
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Automation".to_string()))?;
    Ok(Json(automation))
}

async fn update_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AutomationUpdate>,
) -> ApiResult<Json<AutomationDefinition>> {
    payload.validate()?;
    if let Some(error) = validate_graph(&payload.nodes) {
        return Err(error);
    }

    let definition = AutomationDefinition {
        id,
        name: payload.name,
        description: payload.description,
        is_active: payload.is_active,
        nodes: payload.nodes,
        created_by: None,
        created_at: Utc::now(),
        updated_at: Some(Utc::now()),
    };

    if !state.definitions.update(&definition).await? {
        return Err(AppError::NotFound("Automation".to_string()));
    }
    Ok(Json(definition))
}

async fn set_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.definitions.set_active(id, payload.is_active).await? {
        return Err(AppError::NotFound("Automation".to_string()));
    }
    Ok(Json(serde_json::json!({
        "id": id,
        "is_active": payload.is_active
    })))
}

async fn delete_automation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.definitions.delete(id).await? {
        return Err(AppError::NotFound("Automation".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExecutionQuery>,
) -> ApiResult<Json<Vec<ExecutionRecord>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let records = state.executions.history(query.automation_id, limit).await?;
    Ok(Json(records))
}

/// Inject a domain event onto the bus, the manual counterpart of events the
/// CRM modules emit themselves.
async fn emit_event(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EventCreate>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if payload.module.is_empty() || payload.event.is_empty() {
        return Err(AppError::BadRequest("module and event are required".to_string()));
    }

    let event = DomainEvent::new(&payload.module, &payload.event, payload.payload);
    let event_id = event.event_id;
    state.bus.emit(event);

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "event_id": event_id })),
    ))
}
