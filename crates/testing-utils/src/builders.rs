//! 测试数据构造器

use chrono::{DateTime, Duration, Utc};
use logman_domain::entities::{Node, NodeStatus, Task, TaskStatus};
use uuid::Uuid;

/// 节点构造器
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    pub fn new(hostname: &str, ip: &str) -> Self {
        Self {
            node: Node::new(hostname, ip, 50052),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.node.id = id;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.node.port = port;
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.node.status = status;
        if status != NodeStatus::Busy {
            self.node.current_task = None;
        }
        self
    }

    pub fn busy_with(mut self, task_id: Uuid) -> Self {
        self.node.status = NodeStatus::Busy;
        self.node.current_task = Some(task_id);
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

/// 任务构造器，默认五分钟后开始、持续一分钟、采样间隔 4 秒
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(group_id: i64) -> Self {
        Self {
            task: Task::new("LoadTest", group_id, Utc::now() + Duration::minutes(5), 60, 4),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn starting_at(mut self, start_time: DateTime<Utc>) -> Self {
        self.task.start_time = start_time;
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.task.duration_seconds = seconds;
        self
    }

    pub fn with_interval(mut self, seconds: u32) -> Self {
        self.task.interval_seconds = seconds;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
