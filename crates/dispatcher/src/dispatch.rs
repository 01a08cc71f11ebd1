use std::sync::Arc;

use futures::{future::join_all, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use logman_core::{
    rpc::StartJobRequest, transfer::ChunkStream, NodeClient, SchedulerError, SchedulerResult,
};
use logman_domain::{
    entities::{Node, Task, TaskStatus},
    repositories::TaskRepository,
};
use logman_infrastructure::MetricsCollector;

use crate::registry::{ClaimOutcome, NodeRegistry};

/// 一次分发的结果
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// 任务已不处于待执行状态(被删除、已执行或已失败)
    Skipped { status: Option<TaskStatus> },
    Dispatched(DispatchReport),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub started: Vec<Uuid>,
    /// 启动失败的节点及失败原因
    pub failed: Vec<(Uuid, String)>,
}

impl DispatchReport {
    pub fn all_failed(&self) -> bool {
        self.started.is_empty()
    }
}

/// 任务分发
///
/// 到点后向组内每个节点并发发出 StartJob。单个节点失败只记入任务的失败日志，
/// 只要有一个节点启动成功任务就进入执行中；全部失败时任务失败。
pub struct TaskDispatcher {
    task_repo: Arc<dyn TaskRepository>,
    registry: Arc<NodeRegistry>,
    client: Arc<dyn NodeClient>,
    metrics: Arc<MetricsCollector>,
}

impl TaskDispatcher {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        registry: Arc<NodeRegistry>,
        client: Arc<dyn NodeClient>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            task_repo,
            registry,
            client,
            metrics,
        }
    }

    pub async fn dispatch(&self, task_id: Uuid) -> SchedulerResult<DispatchOutcome> {
        let task = match self.task_repo.find_by_id(task_id).await? {
            Some(task) if task.status == TaskStatus::Scheduled => task,
            other => {
                let status = other.map(|t| t.status);
                info!("任务 {} 不再等待执行 ({:?})，跳过分发", task_id, status);
                return Ok(DispatchOutcome::Skipped { status });
            }
        };

        let members = self.registry.group_members(task.group_id).await?;
        if members.is_empty() {
            warn!("任务 {} 的节点组 {} 中没有节点", task.name, task.group_id);
            self.task_repo
                .append_failure(task.id, &format!("节点组 {} 中没有节点", task.group_id))
                .await?;
            self.task_repo.mark_failed(task.id).await?;
            self.metrics.record_task_failed();
            return Ok(DispatchOutcome::Dispatched(DispatchReport::default()));
        }

        info!(
            "开始分发任务 {} ({}) 到 {} 个节点",
            task.name,
            task.id,
            members.len()
        );

        let request = StartJobRequest {
            job_name: task.name.clone(),
            interval: task.interval_seconds,
            duration: task.duration_seconds,
        };

        let results = join_all(
            members.iter().map(|node| {
                let (task, request) = (&task, &request);
                async move { (node, self.start_on_node(task, node, request).await) }
            }),
        )
        .await;

        let mut report = DispatchReport::default();
        for (node, result) in results {
            match result {
                Ok(()) => report.started.push(node.id),
                Err(e) => {
                    let message = failure_detail(&e);
                    warn!("节点 {} 启动任务 {} 失败: {}", node.label(), task.name, message);
                    self.task_repo
                        .append_failure(task.id, &format!("{}: {}", node.label(), message))
                        .await?;
                    report.failed.push((node.id, message));
                }
            }
        }

        self.metrics
            .record_dispatch(report.started.len(), report.failed.len());

        if report.all_failed() {
            error!("任务 {} 在所有节点上启动失败", task.name);
            self.task_repo.mark_failed(task.id).await?;
            self.metrics.record_task_failed();
        } else {
            info!(
                "任务 {} 已在 {}/{} 个节点上启动",
                task.name,
                report.started.len(),
                members.len()
            );
        }

        Ok(DispatchOutcome::Dispatched(report))
    }

    async fn start_on_node(
        &self,
        task: &Task,
        node: &Node,
        request: &StartJobRequest,
    ) -> SchedulerResult<()> {
        let previous = match self.registry.claim_for_task(node.id, task.id).await? {
            ClaimOutcome::Claimed { previous } => previous,
            ClaimOutcome::AlreadyBusy { task: Some(other) } => {
                return Err(SchedulerError::invalid_state(format!(
                    "节点正在执行任务 {other}"
                )));
            }
            ClaimOutcome::AlreadyBusy { task: None } => {
                return Err(SchedulerError::invalid_state("节点忙碌"));
            }
        };

        match self.client.start_job(&node.address(), request).await {
            Ok(stream) => {
                self.registry.set_group_task(task.group_id, task.id).await?;
                if self.task_repo.mark_in_progress(task.id).await? {
                    info!("任务 {} 开始执行", task.name);
                }
                tokio::spawn(drain_job_output(node.label(), stream));
                Ok(())
            }
            Err(e) => {
                self.registry.release(node.id, task.id, previous).await?;
                Err(e.into())
            }
        }
    }
}

/// 写入失败日志的原因文本
fn failure_detail(err: &SchedulerError) -> String {
    match err {
        SchedulerError::Rpc(e) => e.to_string(),
        SchedulerError::InvalidState(message) => message.clone(),
        other => other.to_string(),
    }
}

/// 读完节点启动任务后回传的输出
async fn drain_job_output(label: String, mut stream: ChunkStream) {
    let mut received = 0usize;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => received += bytes.len(),
            Err(e) => {
                debug!("读取节点 {} 的任务输出中断: {}", label, e);
                return;
            }
        }
    }
    debug!("节点 {} 任务输出 {} 字节", label, received);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;
    use logman_domain::entities::NodeStatus;
    use logman_testing_utils::TaskBuilder;

    #[tokio::test]
    async fn test_dispatch_starts_job_on_every_node() {
        let env = TestEnv::new().await;
        let a = env.add_available_node("NodeA", "10.0.0.1").await;
        let b = env.add_available_node("NodeB", "10.0.0.2").await;
        let group = env.add_group(&[&a, &b]).await;
        let task = env.add_task(&group).await;

        let outcome = env.dispatcher.dispatch(task.id).await.unwrap();
        let DispatchOutcome::Dispatched(report) = outcome else {
            panic!("task was skipped");
        };
        assert_eq!(report.started.len(), 2);

        let calls = env.client.start_job_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1.job_name, "LoadTest");
        assert_eq!(calls[0].1.interval, 4);
        assert_eq!(calls[0].1.duration, 60);

        assert_eq!(env.task(task.id).await.status, TaskStatus::InProgress);
        for id in [a.id, b.id] {
            let node = env.node(id).await;
            assert_eq!(node.status, NodeStatus::Busy);
            assert_eq!(node.current_task, Some(task.id));
        }
        assert_eq!(
            env.registry.get_group(group.id).await.unwrap().current_task,
            Some(task.id)
        );
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_task_running() {
        let env = TestEnv::new().await;
        let a = env.add_available_node("NodeA", "10.0.0.1").await;
        let b = env.add_available_node("NodeB", "10.0.0.2").await;
        let c = env.add_available_node("NodeC", "10.0.0.3").await;
        let group = env.add_group(&[&a, &b, &c]).await;
        let task = env.add_task(&group).await;
        env.client.set_reachable(&b.address(), false);

        env.dispatcher.dispatch(task.id).await.unwrap();

        let stored = env.task(task.id).await;
        assert_eq!(stored.status, TaskStatus::InProgress);
        let log = stored.failure_log.unwrap();
        assert!(log.starts_with("NodeB(10.0.0.2): "), "unexpected log: {log}");

        assert_eq!(env.node(a.id).await.status, NodeStatus::Busy);
        assert_eq!(env.node(c.id).await.status, NodeStatus::Busy);
        // 启动失败的节点恢复到分发前的状态
        let failed = env.node(b.id).await;
        assert_eq!(failed.status, NodeStatus::Available);
        assert!(failed.current_task.is_none());
    }

    #[tokio::test]
    async fn test_all_nodes_failing_fails_task() {
        let env = TestEnv::new().await;
        let a = env.add_node("NodeA", "10.0.0.1").await;
        let b = env.add_node("NodeB", "10.0.0.2").await;
        let group = env.add_group(&[&a, &b]).await;
        let task = env.add_task(&group).await;
        env.client.set_reachable(&a.address(), false);
        env.client.fail_start_job(&b.address(), "采集程序未安装");

        env.dispatcher.dispatch(task.id).await.unwrap();

        let stored = env.task(task.id).await;
        assert_eq!(stored.status, TaskStatus::Failed);
        let text = stored.status_text();
        assert!(text.starts_with("Failed: "));
        assert!(text.contains("NodeA(10.0.0.1)"));
        assert!(text.contains("NodeB(10.0.0.2): 节点拒绝请求(状态码 500): 采集程序未安装"));
        assert_eq!(env.node(a.id).await.status, NodeStatus::Offline);
        assert_eq!(env.node(b.id).await.status, NodeStatus::Offline);
    }

    #[tokio::test]
    async fn test_busy_node_is_not_claimed_twice() {
        let env = TestEnv::new().await;
        let a = env.add_available_node("NodeA", "10.0.0.1").await;
        let group = env.add_group(&[&a]).await;
        let other = Uuid::new_v4();
        env.registry
            .update_status(a.id, NodeStatus::Busy, Some(other))
            .await
            .unwrap();
        let task = env.add_task(&group).await;

        env.dispatcher.dispatch(task.id).await.unwrap();

        assert!(env.client.start_job_calls().is_empty());
        assert_eq!(env.node(a.id).await.current_task, Some(other));
        assert_eq!(env.task(task.id).await.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_empty_group_fails_task() {
        let env = TestEnv::new().await;
        let group = env.registry.create_group("empty", "", vec![]).await.unwrap();
        let task = env.add_task(&group).await;

        env.dispatcher.dispatch(task.id).await.unwrap();

        let stored = env.task(task.id).await;
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.failure_log.is_some());
    }

    #[tokio::test]
    async fn test_non_scheduled_task_is_skipped() {
        let env = TestEnv::new().await;
        let a = env.add_available_node("NodeA", "10.0.0.1").await;
        let group = env.add_group(&[&a]).await;
        let task = TaskBuilder::new(group.id)
            .with_status(TaskStatus::Completed)
            .build();
        env.db.tasks.create(&task).await.unwrap();

        assert_eq!(
            env.dispatcher.dispatch(task.id).await.unwrap(),
            DispatchOutcome::Skipped {
                status: Some(TaskStatus::Completed)
            }
        );
        assert_eq!(
            env.dispatcher.dispatch(Uuid::new_v4()).await.unwrap(),
            DispatchOutcome::Skipped { status: None }
        );
        assert!(env.client.start_job_calls().is_empty());
    }
}
