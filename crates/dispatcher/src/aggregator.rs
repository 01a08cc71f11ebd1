use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use logman_core::{SchedulerError, SchedulerResult};
use logman_domain::{
    entities::TaskStatus, repositories::TaskRepository, ArtifactLayout,
};
use logman_infrastructure::MetricsCollector;

use crate::registry::NodeRegistry;
use crate::workbook::{merge_result_workbooks, result_files};

/// 完成检查的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// 仍有节点的结果文件未到达
    Incomplete { missing: Vec<String> },
    /// 本次检查合并了结果并完成了任务
    Completed { overview: PathBuf, sheets: usize },
    /// 任务此前已经完成
    AlreadyCompleted,
}

/// 结果汇总
///
/// 组内每个节点的结果文件都到齐后，把它们合并为一个总览工作簿并将任务标记为完成。
/// 合并串行执行，每个任务只合并一次。
pub struct ResultAggregator {
    task_repo: Arc<dyn TaskRepository>,
    registry: Arc<NodeRegistry>,
    layout: ArtifactLayout,
    metrics: Arc<MetricsCollector>,
    merge_lock: Mutex<()>,
}

impl ResultAggregator {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        registry: Arc<NodeRegistry>,
        layout: ArtifactLayout,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            task_repo,
            registry,
            layout,
            metrics,
            merge_lock: Mutex::new(()),
        }
    }

    pub async fn validate_completion(&self, task_id: Uuid) -> SchedulerResult<Completion> {
        let _guard = self.merge_lock.lock().await;

        let task = self
            .task_repo
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(task_id))?;
        if task.status == TaskStatus::Completed {
            return Ok(Completion::AlreadyCompleted);
        }

        let members = self.registry.group_members(task.group_id).await?;
        if members.is_empty() {
            debug!("任务 {} 的节点组为空，不做合并", task.name);
            return Ok(Completion::Incomplete { missing: vec![] });
        }

        let mut missing = Vec::new();
        for node in &members {
            if !tokio::fs::try_exists(self.layout.result_path(&task, node)).await? {
                missing.push(node.label());
            }
        }
        if !missing.is_empty() {
            debug!(
                "任务 {} 还在等待 {} 个节点的结果: {}",
                task.name,
                missing.len(),
                missing.join(", ")
            );
            return Ok(Completion::Incomplete { missing });
        }

        let started = Instant::now();
        let run_dir = self.layout.run_dir(&task);
        let overview = self.layout.overview_path(&task);
        let output = overview.clone();
        let sheets = tokio::task::spawn_blocking(move || {
            let files = result_files(&run_dir, task_id)?;
            merge_result_workbooks(&files, &output)
        })
        .await
        .map_err(|e| SchedulerError::Internal(format!("合并任务中断: {e}")))??;

        if self.task_repo.mark_completed(task.id).await? {
            self.metrics
                .record_task_completed(started.elapsed().as_secs_f64());
        } else {
            warn!("任务 {} 当前状态为 {}，合并后未能标记为完成", task.name, task.status);
        }
        self.registry.clear_group_task(task.group_id, task.id).await?;

        info!(
            "任务 {} 的 {} 份结果已合并到 {}",
            task.name,
            sheets,
            overview.display()
        );
        Ok(Completion::Completed { overview, sheets })
    }
}
