use async_trait::async_trait;
use logman_core::{SchedulerError, SchedulerResult};
use logman_domain::{
    entities::{Task, TaskStatus},
    repositories::TaskRepository,
};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::database::mapping::{MappingHelpers, TASK_COLUMNS};

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn duration_column(task: &Task) -> SchedulerResult<i64> {
        i64::try_from(task.duration_seconds).map_err(|_| {
            SchedulerError::validation_error(format!(
                "采集时长超出范围: {}",
                task.duration_seconds
            ))
        })
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> SchedulerResult<bool> {
        let placeholders = (0..from.len())
            .map(|i| format!("${}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE tasks SET status = $1 WHERE id = $2 AND status IN ({placeholders})");

        let mut query = sqlx::query(&sql).bind(to.as_str()).bind(id.to_string());
        for status in from {
            query = query.bind(status.as_str());
        }
        let result = query.execute(&self.pool).await?;

        let changed = result.rows_affected() > 0;
        if changed {
            debug!("任务 {} 状态变更为 {}", id, to);
        }
        Ok(changed)
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let duration = Self::duration_column(task)?;
        sqlx::query(
            r#"
            INSERT INTO tasks (id, name, status, failure_log, group_id, created_at, start_time, duration_seconds, interval_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.name)
        .bind(task.status.as_str())
        .bind(&task.failure_log)
        .bind(task.group_id)
        .bind(task.created_at)
        .bind(task.start_time)
        .bind(duration)
        .bind(i64::from(task.interval_seconds))
        .execute(&self.pool)
        .await?;

        debug!("创建任务成功: {} ({})", task.name, task.id);
        Ok(task.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(MappingHelpers::row_to_task).transpose()
    }

    async fn find_all(&self) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY start_time DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_task).collect()
    }

    async fn find_by_status(&self, status: TaskStatus) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = $1 ORDER BY start_time"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_task).collect()
    }

    async fn find_active(&self) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status IN ($1, $2) ORDER BY start_time"
        ))
        .bind(TaskStatus::Scheduled.as_str())
        .bind(TaskStatus::InProgress.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_task).collect()
    }

    async fn find_by_group(&self, group_id: i64) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE group_id = $1 ORDER BY start_time"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_task).collect()
    }

    async fn update_schedule(&self, task: &Task) -> SchedulerResult<Task> {
        let duration = Self::duration_column(task)?;
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET name = $1, group_id = $2, start_time = $3, duration_seconds = $4, interval_seconds = $5
            WHERE id = $6 AND status = $7
            "#,
        )
        .bind(&task.name)
        .bind(task.group_id)
        .bind(task.start_time)
        .bind(duration)
        .bind(i64::from(task.interval_seconds))
        .bind(task.id.to_string())
        .bind(TaskStatus::Scheduled.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(task.id).await? {
                Some(current) => Err(SchedulerError::invalid_state(format!(
                    "任务 {} 当前状态为 {}，只能修改尚未开始的任务",
                    task.id, current.status
                ))),
                None => Err(SchedulerError::task_not_found(task.id)),
            };
        }

        debug!("更新任务调度参数成功: {}", task.id);
        self.find_by_id(task.id)
            .await?
            .ok_or_else(|| SchedulerError::task_not_found(task.id))
    }

    async fn delete(&self, id: Uuid) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_in_progress(&self, id: Uuid) -> SchedulerResult<bool> {
        self.transition(id, &[TaskStatus::Scheduled], TaskStatus::InProgress)
            .await
    }

    async fn mark_completed(&self, id: Uuid) -> SchedulerResult<bool> {
        self.transition(id, &[TaskStatus::InProgress], TaskStatus::Completed)
            .await
    }

    async fn mark_failed(&self, id: Uuid) -> SchedulerResult<bool> {
        self.transition(
            id,
            &[TaskStatus::Scheduled, TaskStatus::InProgress],
            TaskStatus::Failed,
        )
        .await
    }

    async fn append_failure(&self, id: Uuid, entry: &str) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET failure_log = CASE
                WHEN failure_log IS NULL OR failure_log = '' THEN $1
                ELSE failure_log || '; ' || $1
            END
            WHERE id = $2
            "#,
        )
        .bind(entry)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::task_not_found(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{sqlite::SqliteNodeGroupRepository, DatabaseManager};
    use chrono::{Duration, Utc};
    use logman_domain::{entities::NodeGroup, repositories::NodeGroupRepository};

    async fn setup() -> (SqliteTaskRepository, SqliteNodeGroupRepository, i64) {
        let manager = DatabaseManager::in_memory().await.unwrap();
        manager.migrate().await.unwrap();
        let groups = SqliteNodeGroupRepository::new(manager.pool().clone());
        let group = groups.create(&NodeGroup::new("g", vec![])).await.unwrap();
        (
            SqliteTaskRepository::new(manager.pool().clone()),
            groups,
            group.id,
        )
    }

    fn new_task(group_id: i64) -> Task {
        Task::new("LoadTest", group_id, Utc::now() + Duration::minutes(5), 60, 2)
    }

    #[tokio::test]
    async fn test_create_and_load_task() {
        let (repo, _, group_id) = setup().await;
        let task = new_task(group_id);
        repo.create(&task).await.unwrap();

        let loaded = repo.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "LoadTest");
        assert_eq!(loaded.status, TaskStatus::Scheduled);
        assert_eq!(loaded.duration_seconds, 60);
        assert_eq!(loaded.interval_seconds, 2);
        assert_eq!(
            loaded.start_time.timestamp_millis(),
            task.start_time.timestamp_millis()
        );
        assert_eq!(repo.find_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_duration_is_not_stored() {
        let (repo, _, group_id) = setup().await;
        let mut task = new_task(group_id);
        task.duration_seconds = u64::MAX;

        assert!(matches!(
            repo.create(&task).await,
            Err(SchedulerError::ValidationError(_))
        ));
        assert!(repo.find_by_id(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_transitions_are_conditional() {
        let (repo, _, group_id) = setup().await;
        let task = new_task(group_id);
        repo.create(&task).await.unwrap();

        // 未开始的任务不能直接完成
        assert!(!repo.mark_completed(task.id).await.unwrap());
        assert!(repo.mark_in_progress(task.id).await.unwrap());
        assert!(!repo.mark_in_progress(task.id).await.unwrap());
        assert!(repo.mark_completed(task.id).await.unwrap());
        assert!(!repo.mark_failed(task.id).await.unwrap());

        let loaded = repo.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert!(repo.find_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_log_accumulates() {
        let (repo, _, group_id) = setup().await;
        let task = new_task(group_id);
        repo.create(&task).await.unwrap();

        repo.append_failure(task.id, "NodeB(10.0.0.2): 节点不可达").await.unwrap();
        repo.append_failure(task.id, "NodeC(10.0.0.3): 磁盘已满").await.unwrap();
        repo.mark_failed(task.id).await.unwrap();

        let loaded = repo.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(
            loaded.status_text(),
            "Failed: NodeB(10.0.0.2): 节点不可达; NodeC(10.0.0.3): 磁盘已满"
        );
        assert!(matches!(
            repo.append_failure(Uuid::new_v4(), "x").await,
            Err(SchedulerError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_schedule_only_while_scheduled() {
        let (repo, _, group_id) = setup().await;
        let mut task = new_task(group_id);
        repo.create(&task).await.unwrap();

        task.duration_seconds = 120;
        let updated = repo.update_schedule(&task).await.unwrap();
        assert_eq!(updated.duration_seconds, 120);

        repo.mark_in_progress(task.id).await.unwrap();
        assert!(matches!(
            repo.update_schedule(&task).await,
            Err(SchedulerError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_group_deletion_cascades_tasks() {
        let (repo, groups, group_id) = setup().await;
        let task = new_task(group_id);
        repo.create(&task).await.unwrap();

        groups.delete(group_id).await.unwrap();
        assert!(repo.find_by_id(task.id).await.unwrap().is_none());
    }
}
