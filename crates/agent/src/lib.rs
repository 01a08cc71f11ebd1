//! 采集节点一侧的 RPC 接口
//!
//! - [`agent_routes`]: 控制器调用节点的入口 (IsAlive / StartJob / PushConfig / PullConfig)
//! - [`ControllerClient`]: 节点调用控制器 (Register / SubmitResult / ReportError)

pub mod config_file;
pub mod controller_client;
pub mod error;
pub mod handler;
pub mod routes;

pub use config_file::ConfigFile;
pub use controller_client::ControllerClient;
pub use error::AgentError;
pub use handler::AgentHandler;
pub use routes::{agent_routes, agent_routes_with, AgentRouterConfig};
