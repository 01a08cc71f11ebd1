use async_trait::async_trait;
use logman_core::{SchedulerError, SchedulerResult};
use logman_domain::{
    entities::{Node, NodeGroup},
    repositories::NodeGroupRepository,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::database::mapping::{MappingHelpers, NODE_COLUMNS};

pub struct SqliteNodeGroupRepository {
    pool: SqlitePool,
}

impl SqliteNodeGroupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_member_ids(&self, group_id: i64) -> SchedulerResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT node_id FROM node_group_members WHERE group_id = $1 ORDER BY rowid",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| MappingHelpers::parse_uuid(row, "node_id"))
            .collect()
    }

    async fn row_to_group(&self, row: &SqliteRow) -> SchedulerResult<NodeGroup> {
        let id: i64 = row.try_get("id")?;
        Ok(NodeGroup {
            id,
            name: row.try_get("name")?,
            comments: row.try_get("comments")?,
            current_task: MappingHelpers::parse_optional_uuid(row, "current_task")?,
            node_ids: self.load_member_ids(id).await?,
        })
    }

    async fn replace_members(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        group_id: i64,
        node_ids: &[Uuid],
    ) -> SchedulerResult<()> {
        sqlx::query("DELETE FROM node_group_members WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut **tx)
            .await?;

        for node_id in node_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO node_group_members (group_id, node_id) VALUES ($1, $2)",
            )
            .bind(group_id)
            .bind(node_id.to_string())
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl NodeGroupRepository for SqliteNodeGroupRepository {
    async fn create(&self, group: &NodeGroup) -> SchedulerResult<NodeGroup> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO node_groups (name, comments, current_task) VALUES ($1, $2, $3)",
        )
        .bind(&group.name)
        .bind(&group.comments)
        .bind(group.current_task.map(|t| t.to_string()))
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        Self::replace_members(&mut tx, id, &group.node_ids).await?;
        tx.commit().await?;

        debug!("创建节点组成功: {} (id={})", group.name, id);
        let mut created = group.clone();
        created.id = id;
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> SchedulerResult<Option<NodeGroup>> {
        let row = sqlx::query("SELECT id, name, comments, current_task FROM node_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_group(&row).await?)),
            None => Ok(None),
        }
    }

    async fn find_all(&self) -> SchedulerResult<Vec<NodeGroup>> {
        let rows = sqlx::query("SELECT id, name, comments, current_task FROM node_groups ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in &rows {
            groups.push(self.row_to_group(row).await?);
        }
        Ok(groups)
    }

    async fn update(&self, group: &NodeGroup) -> SchedulerResult<NodeGroup> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE node_groups SET name = $1, comments = $2 WHERE id = $3")
            .bind(&group.name)
            .bind(&group.comments)
            .bind(group.id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::group_not_found(group.id));
        }

        Self::replace_members(&mut tx, group.id, &group.node_ids).await?;
        tx.commit().await?;

        debug!("更新节点组成功: {}", group.id);
        self.find_by_id(group.id)
            .await?
            .ok_or_else(|| SchedulerError::group_not_found(group.id))
    }

    async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM node_groups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_members(&self, id: i64) -> SchedulerResult<Vec<Node>> {
        let columns = NODE_COLUMNS
            .split(", ")
            .map(|c| format!("n.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = sqlx::query(&format!(
            "SELECT {columns} FROM nodes n JOIN node_group_members m ON m.node_id = n.id WHERE m.group_id = $1 ORDER BY n.hostname, n.ip"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_node).collect()
    }

    async fn set_current_task(&self, id: i64, task_id: Option<Uuid>) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE node_groups SET current_task = $1 WHERE id = $2")
            .bind(task_id.map(|t| t.to_string()))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::group_not_found(id));
        }
        Ok(())
    }

    async fn clear_current_task(&self, id: i64, task_id: Uuid) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE node_groups SET current_task = NULL WHERE id = $1 AND current_task = $2",
        )
        .bind(id)
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{sqlite::SqliteNodeRepository, DatabaseManager};
    use logman_domain::repositories::NodeRepository;

    async fn setup() -> (SqliteNodeRepository, SqliteNodeGroupRepository) {
        let manager = DatabaseManager::in_memory().await.unwrap();
        manager.migrate().await.unwrap();
        (
            SqliteNodeRepository::new(manager.pool().clone()),
            SqliteNodeGroupRepository::new(manager.pool().clone()),
        )
    }

    #[tokio::test]
    async fn test_group_membership_roundtrip() {
        let (nodes, groups) = setup().await;
        let a = nodes.create(&Node::new("NodeA", "10.0.0.1", 50052)).await.unwrap();
        let b = nodes.create(&Node::new("NodeB", "10.0.0.2", 50052)).await.unwrap();

        let group = groups
            .create(&NodeGroup::new("web", vec![a.id, b.id]).with_comments("前端节点"))
            .await
            .unwrap();
        assert!(group.id > 0);

        let loaded = groups.find_by_id(group.id).await.unwrap().unwrap();
        assert_eq!(loaded.node_ids, vec![a.id, b.id]);
        assert_eq!(loaded.comments, "前端节点");

        let members = groups.find_members(group.id).await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].hostname, "NodeA");
    }

    #[tokio::test]
    async fn test_node_deletion_removes_membership() {
        let (nodes, groups) = setup().await;
        let a = nodes.create(&Node::new("NodeA", "10.0.0.1", 50052)).await.unwrap();
        let b = nodes.create(&Node::new("NodeB", "10.0.0.2", 50052)).await.unwrap();
        let group = groups
            .create(&NodeGroup::new("web", vec![a.id, b.id]))
            .await
            .unwrap();

        nodes.delete(a.id).await.unwrap();

        let loaded = groups.find_by_id(group.id).await.unwrap().unwrap();
        assert_eq!(loaded.node_ids, vec![b.id]);
    }

    #[tokio::test]
    async fn test_update_replaces_members_and_current_task_guard() {
        let (nodes, groups) = setup().await;
        let a = nodes.create(&Node::new("NodeA", "10.0.0.1", 50052)).await.unwrap();
        let b = nodes.create(&Node::new("NodeB", "10.0.0.2", 50052)).await.unwrap();
        let mut group = groups.create(&NodeGroup::new("web", vec![a.id])).await.unwrap();

        group.name = "all".to_string();
        group.node_ids = vec![b.id];
        let updated = groups.update(&group).await.unwrap();
        assert_eq!(updated.name, "all");
        assert_eq!(updated.node_ids, vec![b.id]);

        let task = Uuid::new_v4();
        groups.set_current_task(group.id, Some(task)).await.unwrap();
        assert!(!groups.clear_current_task(group.id, Uuid::new_v4()).await.unwrap());
        assert!(groups.clear_current_task(group.id, task).await.unwrap());
        assert!(groups.find_by_id(group.id).await.unwrap().unwrap().current_task.is_none());

        assert!(groups.delete(group.id).await.unwrap());
        assert!(groups.find_by_id(group.id).await.unwrap().is_none());
    }
}
