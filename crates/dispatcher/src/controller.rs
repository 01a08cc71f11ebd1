use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use logman_core::{
    transfer::{collect_chunks, write_atomic},
    Clock, NodeClient, SchedulerError, SchedulerResult,
};
use logman_domain::{
    entities::{NewTask, Node, NodeGroup, Task, TaskStatus, TaskUpdate},
    repositories::TaskRepository,
    services::ScheduleValidator,
    ArtifactLayout,
};

use crate::health_checker::{HealthCheckService, HealthChecker};
use crate::registry::NodeRegistry;
use crate::scheduler::TaskScheduler;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskStatusSummary {
    pub scheduled: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskStatusSummary {
    pub fn total(&self) -> usize {
        self.scheduled + self.in_progress + self.completed + self.failed
    }
    pub fn active(&self) -> usize {
        self.scheduled + self.in_progress
    }
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

/// 配置推送结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPushReport {
    pub pushed: Vec<Uuid>,
    /// 推送失败的节点，格式为 `hostname(ip): 原因`
    pub failed: Vec<String>,
}

/// 面向运维操作的任务与节点组管理
pub struct TaskController {
    registry: Arc<NodeRegistry>,
    task_repo: Arc<dyn TaskRepository>,
    scheduler: Arc<TaskScheduler>,
    health: Arc<HealthChecker>,
    client: Arc<dyn NodeClient>,
    layout: ArtifactLayout,
    clock: Arc<dyn Clock>,
    default_interval: u32,
    // 校验与写入之间不允许插入其他任务
    schedule_lock: Mutex<()>,
}

impl TaskController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<NodeRegistry>,
        task_repo: Arc<dyn TaskRepository>,
        scheduler: Arc<TaskScheduler>,
        health: Arc<HealthChecker>,
        client: Arc<dyn NodeClient>,
        layout: ArtifactLayout,
        clock: Arc<dyn Clock>,
        default_interval: u32,
    ) -> Self {
        Self {
            registry,
            task_repo,
            scheduler,
            health,
            client,
            layout,
            clock,
            default_interval,
            schedule_lock: Mutex::new(()),
        }
    }

    pub async fn create_task(&self, new_task: NewTask) -> SchedulerResult<Task> {
        let task = Task::new(
            new_task.name.trim(),
            new_task.group_id,
            new_task.start_time,
            new_task.duration_seconds,
            new_task.interval_seconds.unwrap_or(self.default_interval),
        );

        let _guard = self.schedule_lock.lock().await;
        self.validate_schedule(&task).await?;

        let task = self.task_repo.create(&task).await?;
        self.scheduler.enqueue(&task).await;
        info!("创建任务 {} ({})，开始时间 {}", task.name, task.id, task.start_time);
        Ok(task)
    }

    /// 修改尚未开始的任务并重新安排
    pub async fn update_task(&self, task_id: Uuid, update: TaskUpdate) -> SchedulerResult<Task> {
        let _guard = self.schedule_lock.lock().await;

        let mut task = self.get_task(task_id).await?;
        if task.status != TaskStatus::Scheduled {
            return Err(SchedulerError::invalid_state(format!(
                "任务 {} 当前状态为 {}，只能修改尚未开始的任务",
                task.name, task.status
            )));
        }

        update.apply_to(&mut task);
        task.name = task.name.trim().to_string();
        self.validate_schedule(&task).await?;

        let task = self.task_repo.update_schedule(&task).await?;
        self.scheduler.enqueue(&task).await;
        info!("更新任务 {} ({})", task.name, task.id);
        Ok(task)
    }

    pub async fn delete_task(&self, task_id: Uuid) -> SchedulerResult<bool> {
        self.scheduler.cancel(task_id).await;
        let removed = self.task_repo.delete(task_id).await?;
        if removed {
            info!("删除任务 {}", task_id);
        }
        Ok(removed)
    }

    pub async fn get_task(&self, task_id: Uuid) -> SchedulerResult<Task> {
        self.task_repo
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(task_id))
    }

    pub async fn list_tasks(&self) -> SchedulerResult<Vec<Task>> {
        self.task_repo.find_all().await
    }

    pub async fn status_summary(&self) -> SchedulerResult<TaskStatusSummary> {
        let tasks = self.task_repo.find_all().await?;
        let mut summary = TaskStatusSummary::default();
        for task in &tasks {
            match task.status {
                TaskStatus::Scheduled => summary.scheduled += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
            }
        }
        Ok(summary)
    }

    /// 启动时重新安排所有待执行的任务，返回安排的数量
    pub async fn restore_schedule(&self) -> SchedulerResult<usize> {
        let tasks = self.task_repo.find_by_status(TaskStatus::Scheduled).await?;
        let now = self.clock.now();
        for task in &tasks {
            if task.start_time <= now {
                warn!("任务 {} 的开始时间 {} 已过，立即执行", task.name, task.start_time);
            }
            self.scheduler.enqueue(task).await;
        }
        info!("恢复了 {} 个待执行任务", tasks.len());
        Ok(tasks.len())
    }

    pub async fn create_group(
        &self,
        name: &str,
        comments: &str,
        node_ids: Vec<Uuid>,
    ) -> SchedulerResult<NodeGroup> {
        self.registry.create_group(name, comments, node_ids).await
    }

    pub async fn update_group(
        &self,
        group_id: i64,
        name: &str,
        comments: &str,
        node_ids: Vec<Uuid>,
    ) -> SchedulerResult<NodeGroup> {
        self.registry
            .update_group(group_id, name, comments, node_ids)
            .await
    }

    /// 删除节点组，组内任务随之删除
    pub async fn delete_group(&self, group_id: i64) -> SchedulerResult<bool> {
        for task in self.task_repo.find_by_group(group_id).await? {
            self.scheduler.cancel(task.id).await;
        }
        self.registry.delete_group(group_id).await
    }

    /// 探测组内节点，返回当前可达的节点
    pub async fn reachable_members(&self, group_id: i64) -> SchedulerResult<Vec<Node>> {
        let members = self.registry.group_members(group_id).await?;
        Ok(self.health.check_nodes(&members).await)
    }

    /// 向组内所有节点并发推送配置
    pub async fn push_config_to_group(
        &self,
        group_id: i64,
        config: Bytes,
    ) -> SchedulerResult<ConfigPushReport> {
        let members = self.registry.group_members(group_id).await?;
        let results = join_all(members.iter().map(|node| {
            let config = config.clone();
            async move {
                let result = self.client.push_config(&node.address(), config).await;
                (node, result)
            }
        }))
        .await;

        let mut report = ConfigPushReport::default();
        for (node, result) in results {
            match result {
                Ok(true) => report.pushed.push(node.id),
                Ok(false) => report.failed.push(format!("{}: 节点拒绝了配置", node.label())),
                Err(e) => report.failed.push(format!("{}: {}", node.label(), e)),
            }
        }

        if report.failed.is_empty() {
            info!("配置已推送到节点组 {} 的 {} 个节点", group_id, report.pushed.len());
        } else {
            warn!(
                "向节点组 {} 推送配置时 {} 个节点失败: {}",
                group_id,
                report.failed.len(),
                report.failed.join("; ")
            );
        }
        Ok(report)
    }

    /// 拉取节点当前配置并保存快照
    pub async fn pull_node_config(
        &self,
        node_id: Uuid,
        chunk_size_kb: u32,
    ) -> SchedulerResult<PathBuf> {
        if chunk_size_kb == 0 {
            return Err(SchedulerError::validation_error("分块大小必须大于0"));
        }
        let node = self.registry.get(node_id).await?;

        let stream = self
            .client
            .pull_config(&node.address(), chunk_size_kb)
            .await?;
        let data = collect_chunks(stream).await?;

        let path = self.layout.node_config_path(node.id);
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &data))
            .await
            .map_err(|e| SchedulerError::Internal(format!("写入配置快照中断: {e}")))??;

        info!("已保存节点 {} 的配置快照: {}", node.label(), path.display());
        Ok(path)
    }

    async fn validate_schedule(&self, task: &Task) -> SchedulerResult<()> {
        ScheduleValidator::validate_parameters(task, self.clock.now())?;

        let members = self.registry.group_members(task.group_id).await?;
        if members.is_empty() {
            // 区分节点组不存在与节点组为空
            self.registry.get_group(task.group_id).await?;
            return Err(SchedulerError::validation_error("节点组中没有节点"));
        }

        let mut member_cache: HashMap<i64, Vec<Node>> = HashMap::new();
        let mut active = Vec::new();
        for other in self.task_repo.find_active().await? {
            if other.id == task.id {
                continue;
            }
            let nodes = match member_cache.get(&other.group_id) {
                Some(nodes) => nodes.clone(),
                None => {
                    let nodes = self.registry.group_members(other.group_id).await?;
                    member_cache.insert(other.group_id, nodes.clone());
                    nodes
                }
            };
            active.push((other, nodes));
        }

        ScheduleValidator::ensure_no_conflicts(task, &members, &active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;
    use chrono::Duration as ChronoDuration;
    use logman_domain::entities::MAX_TASK_DURATION_SECONDS;
    use logman_testing_utils::RecordedCall;

    fn new_task(env: &TestEnv, group_id: i64, offset_minutes: i64, duration_seconds: u64) -> NewTask {
        NewTask {
            name: "LoadTest".into(),
            group_id,
            start_time: env.clock.now() + ChronoDuration::minutes(offset_minutes),
            duration_seconds,
            interval_seconds: None,
        }
    }

    #[tokio::test]
    async fn test_create_task_schedules_dispatch() {
        let env = TestEnv::new().await;
        let a = env.add_node("NodeA", "10.0.0.1").await;
        let group = env.add_group(&[&a]).await;

        let task = env
            .controller
            .create_task(new_task(&env, group.id, 5, 60))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.interval_seconds, 4);
        assert!(env.scheduler.is_pending(task.id).await);
    }

    #[tokio::test]
    async fn test_create_task_validation() {
        let env = TestEnv::new().await;
        let a = env.add_node("NodeA", "10.0.0.1").await;
        let group = env.add_group(&[&a]).await;
        let empty = env.registry.create_group("empty", "", vec![]).await.unwrap();

        let past = env.controller.create_task(new_task(&env, group.id, -1, 60)).await;
        assert!(past
            .unwrap_err()
            .to_string()
            .contains("Chosen start time has already passed"));

        assert!(env
            .controller
            .create_task(new_task(&env, group.id, 5, 0))
            .await
            .is_err());

        let mut zero_interval = new_task(&env, group.id, 5, 60);
        zero_interval.interval_seconds = Some(0);
        assert!(env.controller.create_task(zero_interval).await.is_err());

        assert!(matches!(
            env.controller.create_task(new_task(&env, 999, 5, 60)).await,
            Err(SchedulerError::GroupNotFound { .. })
        ));
        assert!(matches!(
            env.controller.create_task(new_task(&env, empty.id, 5, 60)).await,
            Err(SchedulerError::ValidationError(_))
        ));
        assert!(env.controller.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_duration_is_rejected() {
        let env = TestEnv::new().await;
        let a = env.add_node("NodeA", "10.0.0.1").await;
        let group = env.add_group(&[&a]).await;

        for duration in [u64::MAX / 2, u64::MAX, MAX_TASK_DURATION_SECONDS + 1] {
            assert!(matches!(
                env.controller
                    .create_task(new_task(&env, group.id, 5, duration))
                    .await,
                Err(SchedulerError::ValidationError(_))
            ));
        }
        assert!(env.controller.list_tasks().await.unwrap().is_empty());

        let longest = env
            .controller
            .create_task(new_task(&env, group.id, 5, MAX_TASK_DURATION_SECONDS))
            .await
            .unwrap();
        assert_eq!(longest.duration_seconds, MAX_TASK_DURATION_SECONDS);

        // 已有最长任务时，后续创建仍然走冲突检测
        let err = env
            .controller
            .create_task(new_task(&env, group.id, 60, 60))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ScheduleConflict { .. }));
    }

    #[tokio::test]
    async fn test_overlapping_tasks_on_shared_nodes_conflict() {
        let env = TestEnv::new().await;
        let a = env.add_node("NodeA", "10.0.0.1").await;
        let b = env.add_node("NodeB", "10.0.0.2").await;
        let c = env.add_node("NodeC", "10.0.0.3").await;
        let first = env.add_group(&[&a, &b]).await;
        let second = env
            .registry
            .create_group("second", "", vec![b.id, c.id])
            .await
            .unwrap();
        let third = env.registry.create_group("third", "", vec![c.id]).await.unwrap();

        env.controller
            .create_task(new_task(&env, first.id, 5, 600))
            .await
            .unwrap();

        let err = env
            .controller
            .create_task(new_task(&env, second.id, 7, 60))
            .await
            .unwrap_err();
        match err {
            SchedulerError::ScheduleConflict { node_ips } => {
                assert_eq!(node_ips, vec!["10.0.0.2".to_string()])
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // 不共享节点的任务可以重叠
        env.controller
            .create_task(new_task(&env, third.id, 7, 60))
            .await
            .unwrap();
        // 先开始、后覆盖已有窗口的任务同样冲突
        assert!(env
            .controller
            .create_task(new_task(&env, second.id, 1, 600))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_update_task_reschedules_and_ignores_itself() {
        let env = TestEnv::new().await;
        let a = env.add_node("NodeA", "10.0.0.1").await;
        let group = env.add_group(&[&a]).await;
        let task = env
            .controller
            .create_task(new_task(&env, group.id, 5, 600))
            .await
            .unwrap();

        let new_start = env.clock.now() + ChronoDuration::minutes(8);
        let updated = env
            .controller
            .update_task(
                task.id,
                TaskUpdate {
                    start_time: Some(new_start),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.start_time.timestamp_millis(), new_start.timestamp_millis());
        assert_eq!(env.scheduler.pending_count().await, 1);
        assert_eq!(
            env.scheduler.fire_time(task.id).await.map(|t| t.timestamp_millis()),
            Some(new_start.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_update_rejected_once_started() {
        let env = TestEnv::new().await;
        let a = env.add_available_node("NodeA", "10.0.0.1").await;
        let group = env.add_group(&[&a]).await;
        let task = env.add_task(&group).await;
        env.dispatcher.dispatch(task.id).await.unwrap();

        assert!(matches!(
            env.controller
                .update_task(task.id, TaskUpdate::default())
                .await,
            Err(SchedulerError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_task_and_group_cancel_dispatch() {
        let env = TestEnv::new().await;
        let a = env.add_node("NodeA", "10.0.0.1").await;
        let group = env.add_group(&[&a]).await;
        let first = env
            .controller
            .create_task(new_task(&env, group.id, 5, 60))
            .await
            .unwrap();
        let second = env
            .controller
            .create_task(new_task(&env, group.id, 30, 60))
            .await
            .unwrap();

        assert!(env.controller.delete_task(first.id).await.unwrap());
        assert!(!env.scheduler.is_pending(first.id).await);

        assert!(env.controller.delete_group(group.id).await.unwrap());
        assert!(!env.scheduler.is_pending(second.id).await);
        assert!(env.controller.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_config_reports_failed_nodes() {
        let env = TestEnv::new().await;
        let a = env.add_node("NodeA", "10.0.0.1").await;
        let b = env.add_node("NodeB", "10.0.0.2").await;
        let c = env.add_node("NodeC", "10.0.0.3").await;
        let group = env.add_group(&[&a, &b, &c]).await;
        env.client.set_reachable(&b.address(), false);
        env.client.reject_push(&c.address());

        let report = env
            .controller
            .push_config_to_group(group.id, Bytes::from_static(b"[collect]\nrate=4\n"))
            .await
            .unwrap();
        assert_eq!(report.pushed, vec![a.id]);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].starts_with("NodeB(10.0.0.2)"));
        assert!(report.failed[1].starts_with("NodeC(10.0.0.3)"));
        assert_eq!(
            env.client.config(&a.address()).unwrap(),
            b"[collect]\nrate=4\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_pull_node_config_writes_snapshot() {
        let env = TestEnv::new().await;
        let a = env.add_node("NodeA", "10.0.0.1").await;
        env.client.set_config(&a.address(), b"[collect]\nrate=2\n");

        let path = env.controller.pull_node_config(a.id, 1).await.unwrap();
        assert_eq!(path, env.layout.node_config_path(a.id));
        assert_eq!(std::fs::read(&path).unwrap(), b"[collect]\nrate=2\n");
        assert!(env.client.calls().contains(&RecordedCall::PullConfig {
            address: a.address(),
            chunk_size_kb: 1
        }));

        env.client.set_reachable(&a.address(), false);
        assert!(env.controller.pull_node_config(a.id, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_restore_schedule_and_summary() {
        let env = TestEnv::new().await;
        let a = env.add_node("NodeA", "10.0.0.1").await;
        let group = env.add_group(&[&a]).await;
        env.add_task(&group).await;
        let done = logman_testing_utils::TaskBuilder::new(group.id)
            .with_status(TaskStatus::Completed)
            .build();
        env.db.tasks.create(&done).await.unwrap();

        assert_eq!(env.controller.restore_schedule().await.unwrap(), 1);
        assert_eq!(env.scheduler.pending_count().await, 1);

        let summary = env.controller.status_summary().await.unwrap();
        assert_eq!(summary.scheduled, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.active(), 1);
    }

    #[tokio::test]
    async fn test_reachable_members() {
        let env = TestEnv::new().await;
        let a = env.add_node("NodeA", "10.0.0.1").await;
        let b = env.add_node("NodeB", "10.0.0.2").await;
        let group = env.add_group(&[&a, &b]).await;
        env.client.set_reachable(&a.address(), false);

        let reachable = env.controller.reachable_members(group.id).await.unwrap();
        assert_eq!(reachable.len(), 1);
        assert_eq!(reachable[0].id, b.id);
    }
}
