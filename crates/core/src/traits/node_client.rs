use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::RpcResult;
use crate::rpc::StartJobRequest;
use crate::transfer::ChunkStream;

/// 控制器到节点的出站调用
///
/// `address` 为 `ip:port`。实现负责为每类调用设置有限的超时。
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// 存活探测，节点可达即成功
    async fn is_alive(&self, address: &str) -> RpcResult<()>;

    /// 启动采集任务，返回节点回传的数据块流
    async fn start_job(&self, address: &str, request: &StartJobRequest) -> RpcResult<ChunkStream>;

    /// 推送配置文件，返回节点是否接受
    async fn push_config(&self, address: &str, config: Bytes) -> RpcResult<bool>;

    /// 拉取节点当前的配置文件
    async fn pull_config(&self, address: &str, chunk_size_kb: u32) -> RpcResult<ChunkStream>;
}
