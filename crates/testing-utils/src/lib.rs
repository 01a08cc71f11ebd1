//! # Logman Testing Utils
//!
//! 工作区共享的测试工具：
//!
//! - **ScriptedNodeClient**: 按地址预设应答的节点客户端，并记录所有出站调用
//! - **ManualClock**: 手动推进的时钟
//! - **TestDatabase**: 已完成迁移的内存 SQLite 及三个仓储
//! - **Builders**: 节点与任务的测试数据构造器
//! - **Helpers**: 条件等待与结果工作簿的读写
//!
//! ```toml
//! [dev-dependencies]
//! logman-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod database;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use database::*;
pub use helpers::*;
pub use mocks::*;
