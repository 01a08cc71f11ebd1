use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use logman_core::{
    rpc::{paths, PullConfigRequest, RpcReply, StartJobRequest},
    transfer::{collect_chunks, decode_chunk_stream, encode_chunks, CHUNK_SIZE, MAX_FRAME_SIZE},
};
use tracing::{debug, info};

use crate::{error::AgentError, handler::AgentHandler};

/// PullConfig 允许的分块大小上限(KiB)
const MAX_PULL_CHUNK_KB: u32 = 1024;

#[derive(Debug, Clone)]
pub struct AgentRouterConfig {
    pub chunk_size: usize,
    pub max_frame: usize,
}

impl Default for AgentRouterConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_frame: MAX_FRAME_SIZE,
        }
    }
}

#[derive(Clone)]
struct AgentState {
    handler: Arc<dyn AgentHandler>,
    config: AgentRouterConfig,
}

pub fn agent_routes(handler: Arc<dyn AgentHandler>) -> Router {
    agent_routes_with(handler, AgentRouterConfig::default())
}

pub fn agent_routes_with(handler: Arc<dyn AgentHandler>, config: AgentRouterConfig) -> Router {
    Router::new()
        .route(paths::IS_ALIVE, post(is_alive))
        .route(paths::START_JOB, post(start_job))
        .route(paths::PUSH_CONFIG, post(push_config))
        .route(paths::PULL_CONFIG, post(pull_config))
        .with_state(AgentState { handler, config })
}

fn chunked_response(data: &[u8], chunk_size: usize) -> Response {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from(encode_chunks(data, chunk_size)),
    )
        .into_response()
}

async fn is_alive() -> Json<RpcReply> {
    Json(RpcReply::ok())
}

async fn start_job(
    State(state): State<AgentState>,
    Json(request): Json<StartJobRequest>,
) -> Result<Response, AgentError> {
    info!(
        "开始采集任务 {} (间隔 {}s, 时长 {}s)",
        request.job_name, request.interval, request.duration
    );
    let output = state.handler.start_job(&request).await?;
    Ok(chunked_response(&output, state.config.chunk_size))
}

async fn push_config(
    State(state): State<AgentState>,
    body: Body,
) -> Result<Json<RpcReply>, AgentError> {
    let chunks = decode_chunk_stream(body.into_data_stream(), state.config.max_frame);
    let config = collect_chunks(chunks).await?;
    debug!("收到配置 {} 字节", config.len());

    if state.handler.store_config(config).await? {
        Ok(Json(RpcReply::ok()))
    } else {
        Ok(Json(RpcReply::failed("配置未被接受")))
    }
}

async fn pull_config(
    State(state): State<AgentState>,
    Json(request): Json<PullConfigRequest>,
) -> Result<Response, AgentError> {
    if request.chunk_size_kb == 0 || request.chunk_size_kb > MAX_PULL_CHUNK_KB {
        return Err(AgentError::BadRequest(format!(
            "分块大小必须在 1..={MAX_PULL_CHUNK_KB} KiB 之间"
        )));
    }

    let config = state.handler.load_config().await?;
    Ok(chunked_response(
        &config,
        request.chunk_size_kb as usize * 1024,
    ))
}
