use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transfer::{CHUNK_SIZE, MAX_FRAME_SIZE};

/// 控制器RPC服务及出站调用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// 控制器入站RPC监听地址
    pub bind_address: String,
    /// 存活探测超时(秒)
    pub probe_timeout_seconds: u64,
    /// StartJob / PushConfig / PullConfig 调用超时(秒)
    pub call_timeout_seconds: u64,
    /// 分块大小(字节)
    pub chunk_size_bytes: usize,
    /// 单帧允许的最大长度(字节)
    pub max_frame_bytes: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:50051".to_string(),
            probe_timeout_seconds: 2,
            call_timeout_seconds: 30,
            chunk_size_bytes: CHUNK_SIZE,
            max_frame_bytes: MAX_FRAME_SIZE,
        }
    }
}

impl RpcConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow::anyhow!("无效的RPC监听地址: {}", self.bind_address));
        }

        if self.probe_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("存活探测超时必须大于0"));
        }

        if self.call_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("RPC调用超时必须大于0"));
        }

        if self.chunk_size_bytes == 0 || self.chunk_size_bytes > self.max_frame_bytes {
            return Err(anyhow::anyhow!(
                "分块大小必须在 1 到 {} 字节之间",
                self.max_frame_bytes
            ));
        }

        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }
}
