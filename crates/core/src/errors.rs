use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// 控制器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("节点未找到: {id}")]
    NodeNotFound { id: Uuid },

    #[error("节点组未找到: {id}")]
    GroupNotFound { id: i64 },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },

    #[error("节点 {node} 当前没有分配任务")]
    NoActiveTask { node: Uuid },

    #[error("以下节点在指定时间不可用: {}", node_ips.join(", "))]
    ScheduleConflict { node_ips: Vec<String> },

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("非法状态转换: {0}")]
    InvalidState(String),

    #[error("节点通信失败: {0}")]
    Rpc(#[from] RpcError),

    #[error("结果文件读写失败: {0}")]
    Storage(String),

    #[error("表格处理失败: {0}")]
    Spreadsheet(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }

    pub fn node_not_found(id: Uuid) -> Self {
        Self::NodeNotFound { id }
    }

    pub fn group_not_found(id: i64) -> Self {
        Self::GroupNotFound { id }
    }

    pub fn task_not_found(id: Uuid) -> Self {
        Self::TaskNotFound { id }
    }

    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn storage_error<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Internal(_) | SchedulerError::Configuration(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Database(_) | SchedulerError::DatabaseOperation(_) => true,
            SchedulerError::Rpc(err) => err.is_transport(),
            _ => false,
        }
    }

    pub fn user_message(&self) -> &str {
        match self {
            SchedulerError::NodeNotFound { .. } => "请求的节点不存在",
            SchedulerError::GroupNotFound { .. } => "请求的节点组不存在",
            SchedulerError::TaskNotFound { .. } => "请求的任务不存在",
            SchedulerError::NoActiveTask { .. } => "节点当前没有正在执行的任务",
            SchedulerError::ScheduleConflict { .. } => "节点在指定时间段已被占用",
            SchedulerError::ValidationError(_) => "输入数据验证失败",
            SchedulerError::InvalidState(_) => "当前状态不允许此操作",
            SchedulerError::Rpc(_) => "节点通信失败，请稍后重试",
            SchedulerError::Storage(_) => "结果文件写入失败",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        SchedulerError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

/// 控制器与节点之间一次调用的失败原因
///
/// 传输层失败(节点不可达、超时)与节点明确返回的业务失败分开表示，
/// 调用方据此决定是累加失败计数还是记录到任务失败日志。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("节点不可达: {0}")]
    Transport(String),

    #[error("调用超时({}ms)", .0.as_millis())]
    Timeout(Duration),

    #[error("节点拒绝请求(状态码 {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("传输协议错误: {0}")]
    Protocol(String),
}

pub type RpcResult<T> = Result<T, RpcError>;

impl RpcError {
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// 是否属于网络层面的失败(节点可能只是暂时不可达)
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::Timeout(_))
    }
}
