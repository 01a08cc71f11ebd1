use async_trait::async_trait;
use logman_core::{rpc::StartJobRequest, SchedulerResult};

/// 节点上真正执行采集与保存配置的部分
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// 启动一次采集，返回立即回传给控制器的输出
    ///
    /// 采集结果在任务结束后由节点通过 SubmitResult 另行上传。
    async fn start_job(&self, request: &StartJobRequest) -> SchedulerResult<Vec<u8>>;

    /// 保存控制器推送的配置，返回是否接受
    async fn store_config(&self, config: Vec<u8>) -> SchedulerResult<bool>;

    async fn load_config(&self) -> SchedulerResult<Vec<u8>>;
}
