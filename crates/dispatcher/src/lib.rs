//! # Logman Dispatcher
//!
//! 控制器的核心服务：节点注册表、健康检查、任务调度与分发、结果汇总，
//! 以及处理节点请求的网关和面向运维操作的任务控制器。

pub mod aggregator;
pub mod controller;
pub mod dispatch;
pub mod gateway;
pub mod health_checker;
pub mod registry;
pub mod scheduler;
pub mod workbook;

#[cfg(test)]
pub mod test_utils;

pub use aggregator::{Completion, ResultAggregator};
pub use controller::{ConfigPushReport, TaskController, TaskStatusSummary};
pub use dispatch::{DispatchOutcome, DispatchReport, TaskDispatcher};
pub use gateway::{RpcGateway, Submission};
pub use health_checker::{
    HealthCheckService, HealthChecker, HealthCheckerConfig, RetryState, SweepReport,
};
pub use registry::{ClaimOutcome, GroupStatusCounts, NodeRegistry, RegistrationOutcome};
pub use scheduler::TaskScheduler;
