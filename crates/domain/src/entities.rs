use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 节点注册时未携带端口使用的默认端口
pub const DEFAULT_NODE_PORT: u16 = 50052;

/// 默认采样间隔(秒)
pub const DEFAULT_SAMPLING_INTERVAL: u32 = 4;

/// 单个任务允许的最长采集时长(秒)，30 天
pub const MAX_TASK_DURATION_SECONDS: u64 = 30 * 24 * 60 * 60;

/// 节点状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Offline,
    Available,
    Busy,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Offline => "OFFLINE",
            NodeStatus::Available => "AVAILABLE",
            NodeStatus::Busy => "BUSY",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeStatus::Offline => "Offline",
            NodeStatus::Available => "Available",
            NodeStatus::Busy => "Busy",
        };
        f.write_str(label)
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OFFLINE" => Ok(NodeStatus::Offline),
            "AVAILABLE" => Ok(NodeStatus::Available),
            "BUSY" => Ok(NodeStatus::Busy),
            other => Err(format!("未知的节点状态: {other}")),
        }
    }
}

/// 日志采集节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    pub comments: String,
    pub status: NodeStatus,
    pub current_task: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// 创建新的节点，初始状态为离线，等待下一次健康检查
    pub fn new(hostname: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            hostname: hostname.into(),
            ip: ip.into(),
            port,
            comments: String::new(),
            status: NodeStatus::Offline,
            current_task: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// 节点RPC地址 `ip:port`
    pub fn address(&self) -> String {
        if self.ip.contains(':') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }

    /// IP 的最后一段，用于结果文件命名
    pub fn ip_suffix(&self) -> &str {
        self.ip
            .rsplit(['.', ':'])
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.ip)
    }

    /// 结果文件名前缀 `<hostname>_<ipSuffix>`
    pub fn artifact_prefix(&self) -> String {
        format!("{}_{}", self.hostname, self.ip_suffix())
    }

    /// 失败日志中标识节点的文本
    pub fn label(&self) -> String {
        format!("{}({})", self.hostname, self.ip)
    }

    pub fn is_busy(&self) -> bool {
        self.status == NodeStatus::Busy
    }
}

/// 节点组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub id: i64,
    pub name: String,
    pub comments: String,
    /// 正在占用该组的任务
    pub current_task: Option<Uuid>,
    pub node_ids: Vec<Uuid>,
}

impl NodeGroup {
    pub fn new(name: impl Into<String>, node_ids: Vec<Uuid>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            comments: String::new(),
            current_task: None,
            node_ids,
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = comments.into();
        self
    }
}

/// 任务状态
///
/// `Failed` 的详细原因保存在 [`Task::failure_log`] 中。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Scheduled,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// 未完成且未失败的任务参与时间冲突检查
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Scheduled | TaskStatus::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Scheduled => "Scheduled",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
        };
        f.write_str(label)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SCHEDULED" => Ok(TaskStatus::Scheduled),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("未知的任务状态: {other}")),
        }
    }
}

/// 定时采集任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub status: TaskStatus,
    /// 各节点失败信息，按到达顺序以 `; ` 拼接
    pub failure_log: Option<String>,
    pub group_id: i64,
    pub created_at: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u64,
    pub interval_seconds: u32,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        group_id: i64,
        start_time: DateTime<Utc>,
        duration_seconds: u64,
        interval_seconds: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: TaskStatus::Scheduled,
            failure_log: None,
            group_id,
            created_at: Utc::now(),
            start_time,
            duration_seconds,
            interval_seconds,
        }
    }

    /// 超过上限的时长按上限计算
    pub fn duration(&self) -> Duration {
        let seconds = self.duration_seconds.min(MAX_TASK_DURATION_SECONDS);
        Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time
            .checked_add_signed(self.duration())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// 两个任务的时间窗口 [start, start + duration] 是否相交(端点相接也算)
    pub fn overlaps(&self, other: &Task) -> bool {
        self.start_time <= other.end_time() && other.start_time <= self.end_time()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// 面向用户的状态文本，失败时附带失败日志
    pub fn status_text(&self) -> String {
        match (&self.status, self.failure_log.as_deref()) {
            (TaskStatus::Failed, Some(log)) if !log.is_empty() => format!("Failed: {log}"),
            (status, _) => status.to_string(),
        }
    }
}

/// 新建任务的输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub group_id: i64,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u64,
    pub interval_seconds: Option<u32>,
}

/// 修改尚未触发的任务
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub group_id: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
    pub interval_seconds: Option<u32>,
}

impl TaskUpdate {
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(name) = &self.name {
            task.name = name.clone();
        }
        if let Some(group_id) = self.group_id {
            task.group_id = group_id;
        }
        if let Some(start_time) = self.start_time {
            task.start_time = start_time;
        }
        if let Some(duration) = self.duration_seconds {
            task.duration_seconds = duration;
        }
        if let Some(interval) = self.interval_seconds {
            task.interval_seconds = interval;
        }
    }
}
