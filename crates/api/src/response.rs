use axum::Json;
use logman_core::rpc::RpcReply;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub offline: usize,
    pub available: usize,
    pub busy: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub nodes: NodeCounts,
}

pub fn ok() -> Json<RpcReply> {
    Json(RpcReply::ok())
}

pub fn ok_with_message(message: impl Into<String>) -> Json<RpcReply> {
    Json(RpcReply {
        success: true,
        message: Some(message.into()),
    })
}
