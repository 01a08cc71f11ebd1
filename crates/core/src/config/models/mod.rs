pub mod app_config;
pub mod database;
pub mod dispatcher;
pub mod observability;
pub mod rpc;
pub mod storage;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher::{HealthConfig, SchedulerConfig};
pub use observability::ObservabilityConfig;
pub use rpc::RpcConfig;
pub use storage::StorageConfig;
