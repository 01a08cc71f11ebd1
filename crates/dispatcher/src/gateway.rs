use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use logman_core::{
    rpc::{RegisterRequest, RegisterResponse},
    transfer::{collect_chunks, write_atomic, ChunkStream},
    SchedulerError, SchedulerResult,
};
use logman_domain::{
    entities::{Node, NodeStatus, Task, TaskStatus},
    repositories::TaskRepository,
    ArtifactLayout,
};
use logman_infrastructure::MetricsCollector;

use crate::aggregator::{Completion, ResultAggregator};
use crate::registry::NodeRegistry;

/// 结果提交的处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub task_id: Uuid,
    pub artifact: PathBuf,
    pub completion: Completion,
}

/// 节点发往控制器的请求
pub struct RpcGateway {
    registry: Arc<NodeRegistry>,
    task_repo: Arc<dyn TaskRepository>,
    aggregator: Arc<ResultAggregator>,
    layout: ArtifactLayout,
    metrics: Arc<MetricsCollector>,
}

impl RpcGateway {
    pub fn new(
        registry: Arc<NodeRegistry>,
        task_repo: Arc<dyn TaskRepository>,
        aggregator: Arc<ResultAggregator>,
        layout: ArtifactLayout,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            registry,
            task_repo,
            aggregator,
            layout,
            metrics,
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> SchedulerResult<RegisterResponse> {
        let outcome = self
            .registry
            .register(&request.hostname, &request.ip, request.port, request.uuid)
            .await?;

        Ok(RegisterResponse {
            success: true,
            uuid: Some(outcome.node.id),
        })
    }

    /// 接收节点上传的结果文件
    ///
    /// 数据完整接收后才写入目标路径。写入成功即释放节点，然后检查任务是否已全部完成。
    pub async fn submit_result(
        &self,
        node_id: Uuid,
        chunks: ChunkStream,
    ) -> SchedulerResult<Submission> {
        let (node, task) = self.assignment(node_id).await?;

        let data = collect_chunks(chunks).await?;
        let artifact = self.layout.result_path(&task, &node);
        let path = artifact.clone();
        let size = data.len();
        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|e| SchedulerError::Internal(format!("写入结果文件中断: {e}")))?
            .map_err(|e| {
                SchedulerError::storage_error(format!("写入 {} 失败: {e}", artifact.display()))
            })?;

        self.metrics.record_result_received(size);
        info!(
            "收到节点 {} 的任务 {} 结果 ({} 字节)",
            node.label(),
            task.name,
            size
        );

        self.registry
            .release(node.id, task.id, NodeStatus::Available)
            .await?;

        let completion = self.aggregator.validate_completion(task.id).await?;
        if matches!(completion, Completion::Incomplete { .. }) {
            self.settle_partial_failure(task.id).await?;
        }

        Ok(Submission {
            task_id: task.id,
            artifact,
            completion,
        })
    }

    /// 节点报告任务执行失败
    pub async fn report_error(&self, node_id: Uuid, message: &str) -> SchedulerResult<()> {
        let (node, task) = self.assignment(node_id).await?;

        warn!("节点 {} 报告任务 {} 失败: {}", node.label(), task.name, message);
        self.metrics.record_node_error();

        self.task_repo
            .append_failure(task.id, &format!("{}: {}", node.label(), message))
            .await?;
        if self.task_repo.mark_failed(task.id).await? {
            self.metrics.record_task_failed();
        }
        self.registry.clear_group_task(task.group_id, task.id).await?;
        self.registry
            .release(node.id, task.id, NodeStatus::Available)
            .await?;

        Ok(())
    }

    async fn assignment(&self, node_id: Uuid) -> SchedulerResult<(Node, Task)> {
        let node = self.registry.get(node_id).await?;
        let task_id = node
            .current_task
            .ok_or(SchedulerError::NoActiveTask { node: node_id })?;
        let task = self
            .task_repo
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(task_id))?;
        Ok((node, task))
    }

    /// 部分节点启动失败时，最后一个执行中的节点交回结果后任务不可能再完成，标记为失败
    async fn settle_partial_failure(&self, task_id: Uuid) -> SchedulerResult<()> {
        let Some(task) = self.task_repo.find_by_id(task_id).await? else {
            return Ok(());
        };
        let has_failures = task.failure_log.as_deref().is_some_and(|log| !log.is_empty());
        if task.status != TaskStatus::InProgress || !has_failures {
            return Ok(());
        }
        if !self.registry.nodes_for_task(task_id).await?.is_empty() {
            return Ok(());
        }

        if self.task_repo.mark_failed(task_id).await? {
            self.metrics.record_task_failed();
            warn!("任务 {} 的部分节点未能执行，标记为失败", task.name);
        }
        self.registry.clear_group_task(task.group_id, task_id).await?;
        Ok(())
    }
}
