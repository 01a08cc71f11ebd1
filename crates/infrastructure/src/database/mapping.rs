use std::str::FromStr;

use logman_core::{SchedulerError, SchedulerResult};
use logman_domain::entities::{Node, NodeStatus, Task, TaskStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// 行到实体的映射辅助函数
pub struct MappingHelpers;

impl MappingHelpers {
    pub fn parse_uuid(row: &SqliteRow, column: &str) -> SchedulerResult<Uuid> {
        let raw: String = row.try_get(column)?;
        Uuid::parse_str(&raw)
            .map_err(|e| SchedulerError::database_error(format!("列 {column} 不是合法UUID: {e}")))
    }

    pub fn parse_optional_uuid(row: &SqliteRow, column: &str) -> SchedulerResult<Option<Uuid>> {
        let raw: Option<String> = row.try_get(column)?;
        raw.map(|value| {
            Uuid::parse_str(&value).map_err(|e| {
                SchedulerError::database_error(format!("列 {column} 不是合法UUID: {e}"))
            })
        })
        .transpose()
    }

    pub fn parse_enum<T>(row: &SqliteRow, column: &str) -> SchedulerResult<T>
    where
        T: FromStr<Err = String>,
    {
        let raw: String = row.try_get(column)?;
        raw.parse().map_err(SchedulerError::database_error)
    }

    pub fn row_to_node(row: &SqliteRow) -> SchedulerResult<Node> {
        let port: i64 = row.try_get("port")?;
        Ok(Node {
            id: Self::parse_uuid(row, "id")?,
            hostname: row.try_get("hostname")?,
            ip: row.try_get("ip")?,
            port: u16::try_from(port)
                .map_err(|_| SchedulerError::database_error(format!("无效的端口: {port}")))?,
            comments: row.try_get("comments")?,
            status: Self::parse_enum::<NodeStatus>(row, "status")?,
            current_task: Self::parse_optional_uuid(row, "current_task")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        let duration: i64 = row.try_get("duration_seconds")?;
        let interval: i64 = row.try_get("interval_seconds")?;
        Ok(Task {
            id: Self::parse_uuid(row, "id")?,
            name: row.try_get("name")?,
            status: Self::parse_enum::<TaskStatus>(row, "status")?,
            failure_log: row.try_get("failure_log")?,
            group_id: row.try_get("group_id")?,
            created_at: row.try_get("created_at")?,
            start_time: row.try_get("start_time")?,
            duration_seconds: duration.max(0) as u64,
            interval_seconds: interval.clamp(0, u32::MAX as i64) as u32,
        })
    }
}

pub(crate) const NODE_COLUMNS: &str =
    "id, hostname, ip, port, comments, status, current_task, created_at, updated_at";

pub(crate) const TASK_COLUMNS: &str = "id, name, status, failure_log, group_id, created_at, start_time, duration_seconds, interval_seconds";
