//! 控制器的 HTTP 入口
//!
//! 节点通过这里注册、上传结果和报告错误。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use crate::middleware::{cors_layer, request_logging, trace_layer};

pub use error::{ApiError, ApiResult};
pub use routes::{create_routes, AppState};

pub fn create_app(state: AppState) -> Router {
    create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(cors_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
