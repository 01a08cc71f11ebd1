//! 控制器与节点之间的RPC消息定义

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 携带调用方节点身份的请求头
pub const NODE_ID_HEADER: &str = "x-node-id";

pub mod paths {
    pub const REGISTER: &str = "/rpc/register";
    pub const SUBMIT_RESULT: &str = "/rpc/submit_result";
    pub const REPORT_ERROR: &str = "/rpc/report_error";

    pub const IS_ALIVE: &str = "/rpc/is_alive";
    pub const START_JOB: &str = "/rpc/start_job";
    pub const PUSH_CONFIG: &str = "/rpc/push_config";
    pub const PULL_CONFIG: &str = "/rpc/pull_config";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub uuid: Option<Uuid>,
}

/// 通用的成功/失败应答
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RpcReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartJobRequest {
    pub job_name: String,
    /// 采样间隔(秒)
    pub interval: u32,
    /// 采集时长(秒)
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullConfigRequest {
    pub chunk_size_kb: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportErrorRequest {
    pub message: String,
}
