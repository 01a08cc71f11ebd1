use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, Method},
    middleware::Next,
    response::Response,
};
use logman_core::rpc::NODE_ID_HEADER;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;

pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    info!(
        "完成请求处理: {} {} - 状态: {} - 耗时: {:?}",
        method,
        uri,
        response.status(),
        start.elapsed()
    );

    response
}

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

/// 从 `x-node-id` 请求头中取出调用方节点的 UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for NodeId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(NODE_ID_HEADER)
            .ok_or_else(|| ApiError::BadRequest(format!("缺少请求头 {NODE_ID_HEADER}")))?;

        value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(NodeId)
            .ok_or_else(|| ApiError::BadRequest(format!("请求头 {NODE_ID_HEADER} 不是合法的UUID")))
    }
}
