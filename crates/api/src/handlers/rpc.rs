//! 节点调用控制器的 RPC 入口

use axum::{body::Body, extract::State, Json};
use logman_core::{
    rpc::{RegisterRequest, RegisterResponse, ReportErrorRequest, RpcReply},
    transfer::decode_chunk_stream,
};
use logman_dispatcher::Completion;
use tracing::{debug, info};

use crate::{
    error::{ApiError, ApiResult},
    middleware::NodeId,
    response,
    routes::AppState,
};

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<RegisterResponse>> {
    if request.hostname.trim().is_empty() || request.ip.trim().is_empty() {
        return Err(ApiError::BadRequest("主机名和IP不能为空".to_string()));
    }

    let response = state.gateway.register(request).await?;
    Ok(Json(response))
}

/// 请求体为分块编码的结果文件
pub async fn submit_result(
    State(state): State<AppState>,
    NodeId(node_id): NodeId,
    body: Body,
) -> ApiResult<Json<RpcReply>> {
    let chunks = decode_chunk_stream(body.into_data_stream(), state.max_frame);
    let submission = state.gateway.submit_result(node_id, chunks).await?;

    match submission.completion {
        Completion::Completed { overview, .. } => {
            info!("任务 {} 已完成, 总览文件 {}", submission.task_id, overview.display());
            Ok(response::ok_with_message("任务已完成"))
        }
        Completion::Incomplete { missing } => {
            debug!("任务 {} 仍在等待 {} 个节点", submission.task_id, missing.len());
            Ok(response::ok())
        }
        Completion::AlreadyCompleted => Ok(response::ok()),
    }
}

pub async fn report_error(
    State(state): State<AppState>,
    NodeId(node_id): NodeId,
    Json(request): Json<ReportErrorRequest>,
) -> ApiResult<Json<RpcReply>> {
    state
        .gateway
        .report_error(node_id, &request.message)
        .await?;
    Ok(response::ok())
}
