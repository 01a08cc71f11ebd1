use async_trait::async_trait;
use chrono::Utc;
use logman_core::{SchedulerError, SchedulerResult};
use logman_domain::{
    entities::{Node, NodeStatus},
    repositories::NodeRepository,
};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::database::mapping::{MappingHelpers, NODE_COLUMNS};

pub struct SqliteNodeRepository {
    pool: SqlitePool,
}

impl SqliteNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeRepository for SqliteNodeRepository {
    async fn create(&self, node: &Node) -> SchedulerResult<Node> {
        sqlx::query(
            r#"
            INSERT INTO nodes (id, hostname, ip, port, comments, status, current_task, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(node.id.to_string())
        .bind(&node.hostname)
        .bind(&node.ip)
        .bind(i64::from(node.port))
        .bind(&node.comments)
        .bind(node.status.as_str())
        .bind(node.current_task.map(|id| id.to_string()))
        .bind(node.created_at)
        .bind(node.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("创建节点成功: {} ({})", node.id, node.address());
        Ok(node.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<Node>> {
        let row = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(MappingHelpers::row_to_node).transpose()
    }

    async fn find_by_host(&self, hostname: &str, ip: &str) -> SchedulerResult<Option<Node>> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE hostname = $1 COLLATE NOCASE AND ip = $2 COLLATE NOCASE ORDER BY created_at LIMIT 1"
        ))
        .bind(hostname)
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(MappingHelpers::row_to_node).transpose()
    }

    async fn find_all(&self) -> SchedulerResult<Vec<Node>> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes ORDER BY hostname, ip"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_node).collect()
    }

    async fn find_by_status(&self, status: NodeStatus) -> SchedulerResult<Vec<Node>> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE status = $1 ORDER BY hostname, ip"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_node).collect()
    }

    async fn find_by_task(&self, task_id: Uuid) -> SchedulerResult<Vec<Node>> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE current_task = $1 ORDER BY hostname, ip"
        ))
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_node).collect()
    }

    async fn update_port(&self, id: Uuid, port: u16) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE nodes SET port = $1, updated_at = $2 WHERE id = $3")
            .bind(i64::from(port))
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::node_not_found(id));
        }
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: NodeStatus,
        status: NodeStatus,
        current_task: Option<Uuid>,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE nodes SET status = $1, current_task = $2, updated_at = $3 WHERE id = $4 AND status = $5",
        )
        .bind(status.as_str())
        .bind(current_task.map(|t| t.to_string()))
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_task(
        &self,
        id: Uuid,
        task_id: Uuid,
        status: NodeStatus,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE nodes SET status = $1, current_task = NULL, updated_at = $2 WHERE id = $3 AND current_task = $4",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_idle_to_offline(&self) -> SchedulerResult<u64> {
        let result = sqlx::query(
            "UPDATE nodes SET status = $1, current_task = NULL, updated_at = $2 WHERE status != $3",
        )
        .bind(NodeStatus::Offline.as_str())
        .bind(Utc::now())
        .bind(NodeStatus::Busy.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_available_if_idle(&self, id: Uuid) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE nodes SET status = $1, current_task = NULL, updated_at = $2 WHERE id = $3 AND status != $4",
        )
        .bind(NodeStatus::Available.as_str())
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(NodeStatus::Busy.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM nodes WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        debug!("删除节点: {} ({} 行)", id, result.rows_affected());
        Ok(result.rows_affected() > 0)
    }
}
