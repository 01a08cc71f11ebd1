//! 内存数据库测试环境

use std::sync::Arc;

use logman_infrastructure::{
    DatabaseManager, SqliteNodeGroupRepository, SqliteNodeRepository, SqliteTaskRepository,
};

/// 已完成迁移的内存 SQLite 及其上的仓储
pub struct TestDatabase {
    pub manager: DatabaseManager,
    pub nodes: Arc<SqliteNodeRepository>,
    pub groups: Arc<SqliteNodeGroupRepository>,
    pub tasks: Arc<SqliteTaskRepository>,
}

impl TestDatabase {
    pub async fn new() -> Self {
        let manager = DatabaseManager::in_memory()
            .await
            .expect("failed to open in-memory database");
        manager.migrate().await.expect("failed to run migrations");

        let pool = manager.pool().clone();
        Self {
            nodes: Arc::new(SqliteNodeRepository::new(pool.clone())),
            groups: Arc::new(SqliteNodeGroupRepository::new(pool.clone())),
            tasks: Arc::new(SqliteTaskRepository::new(pool)),
            manager,
        }
    }
}
