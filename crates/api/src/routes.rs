use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use logman_core::rpc::paths;
use logman_dispatcher::{NodeRegistry, RpcGateway};

use crate::handlers::{health::health_check, rpc};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<RpcGateway>,
    pub registry: Arc<NodeRegistry>,
    /// 上传结果时单帧允许的最大字节数
    pub max_frame: usize,
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(paths::REGISTER, post(rpc::register))
        .route(paths::SUBMIT_RESULT, post(rpc::submit_result))
        .route(paths::REPORT_ERROR, post(rpc::report_error))
        .with_state(state)
}
