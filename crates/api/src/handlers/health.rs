use axum::{extract::State, Json};
use logman_domain::entities::NodeStatus;

use crate::{
    error::ApiResult,
    response::{HealthResponse, NodeCounts},
    routes::AppState,
};

pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let mut nodes = NodeCounts::default();
    for node in state.registry.list().await? {
        match node.status {
            NodeStatus::Offline => nodes.offline += 1,
            NodeStatus::Available => nodes.available += 1,
            NodeStatus::Busy => nodes.busy += 1,
        }
    }

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        service: "logman-controller".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        nodes,
    }))
}
