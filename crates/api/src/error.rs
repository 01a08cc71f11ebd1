use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use logman_core::{rpc::RpcReply, RpcError, SchedulerError};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(err) => match err {
                SchedulerError::NodeNotFound { .. }
                | SchedulerError::GroupNotFound { .. }
                | SchedulerError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
                SchedulerError::NoActiveTask { .. }
                | SchedulerError::ScheduleConflict { .. }
                | SchedulerError::InvalidState(_) => StatusCode::CONFLICT,
                SchedulerError::ValidationError(_) | SchedulerError::Serialization(_) => {
                    StatusCode::BAD_REQUEST
                }
                SchedulerError::Rpc(RpcError::Protocol(_)) => StatusCode::BAD_REQUEST,
                SchedulerError::Rpc(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        }

        (status, Json(RpcReply::failed(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(SchedulerError::node_not_found(Uuid::new_v4())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(SchedulerError::NoActiveTask {
                node: Uuid::new_v4()
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(SchedulerError::Rpc(RpcError::protocol("截断"))).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SchedulerError::storage_error("磁盘已满")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
