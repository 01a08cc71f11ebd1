use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use logman_core::config::models::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

/// 建表语句，全部幂等，启动时按顺序执行
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id TEXT PRIMARY KEY NOT NULL,
        hostname TEXT NOT NULL,
        ip TEXT NOT NULL,
        port INTEGER NOT NULL,
        comments TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'OFFLINE',
        current_task TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_nodes_host ON nodes (hostname COLLATE NOCASE, ip COLLATE NOCASE)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes (status)",
    r#"
    CREATE TABLE IF NOT EXISTS node_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        comments TEXT NOT NULL DEFAULT '',
        current_task TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS node_group_members (
        group_id INTEGER NOT NULL REFERENCES node_groups(id) ON DELETE CASCADE,
        node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        PRIMARY KEY (group_id, node_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'SCHEDULED',
        failure_log TEXT,
        group_id INTEGER NOT NULL REFERENCES node_groups(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        start_time TEXT NOT NULL,
        duration_seconds INTEGER NOT NULL,
        interval_seconds INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_group ON tasks (group_id)",
];

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的数据库URL: {}", config.url))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(options)
            .await
            .context("连接数据库失败")?;

        Ok(Self { pool })
    }

    /// 内存数据库，仅保留一个永不回收的连接，保证所有查询看到同一份数据
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("创建内存数据库失败")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("执行数据库迁移失败")?;
        }
        info!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        manager.migrate().await.unwrap();
        manager.migrate().await.unwrap();
        manager.health_check().await.unwrap();

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(manager.pool())
                .await
                .unwrap();
        for expected in ["node_group_members", "node_groups", "nodes", "tasks"] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite:{}", dir.path().join("logman.db").display()),
            ..Default::default()
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        manager.close().await;
        assert!(dir.path().join("logman.db").exists());
    }
}
