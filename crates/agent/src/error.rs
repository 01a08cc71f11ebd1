use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use logman_core::{rpc::RpcReply, RpcError, SchedulerError};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("{0}")]
    Handler(#[from] SchedulerError),

    #[error("{0}")]
    Transfer(#[from] RpcError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = match &self {
            AgentError::BadRequest(_) | AgentError::Transfer(_) => StatusCode::BAD_REQUEST,
            AgentError::Handler(SchedulerError::ValidationError(_)) => StatusCode::BAD_REQUEST,
            AgentError::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("节点请求处理失败: {}", self);

        (status, Json(RpcReply::failed(self.to_string()))).into_response()
    }
}
