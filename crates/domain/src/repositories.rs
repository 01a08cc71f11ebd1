//! 领域仓储抽象
//!
//! 每个状态变更方法都对应存储层的一次单行条件更新，
//! 调用方不需要在网络调用期间持有任何锁。

use async_trait::async_trait;
use logman_core::SchedulerResult;
use uuid::Uuid;

use crate::entities::{Node, NodeGroup, NodeStatus, Task, TaskStatus};

/// 节点仓储抽象
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn create(&self, node: &Node) -> SchedulerResult<Node>;
    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<Node>>;
    /// hostname 与 ip 均按不区分大小写匹配
    async fn find_by_host(&self, hostname: &str, ip: &str) -> SchedulerResult<Option<Node>>;
    async fn find_all(&self) -> SchedulerResult<Vec<Node>>;
    async fn find_by_status(&self, status: NodeStatus) -> SchedulerResult<Vec<Node>>;
    async fn find_by_task(&self, task_id: Uuid) -> SchedulerResult<Vec<Node>>;
    async fn update_port(&self, id: Uuid, port: u16) -> SchedulerResult<()>;
    /// 仅当节点当前状态等于 `expected` 时写入新状态，返回是否写入
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: NodeStatus,
        status: NodeStatus,
        current_task: Option<Uuid>,
    ) -> SchedulerResult<bool>;
    /// 仅当节点仍分配给 `task_id` 时释放，返回是否释放
    async fn release_task(&self, id: Uuid, task_id: Uuid, status: NodeStatus)
        -> SchedulerResult<bool>;
    /// 将所有非 Busy 节点置为 Offline，返回影响行数
    async fn reset_idle_to_offline(&self) -> SchedulerResult<u64>;
    /// 非 Busy 节点置为 Available
    async fn mark_available_if_idle(&self, id: Uuid) -> SchedulerResult<bool>;
    async fn delete(&self, id: Uuid) -> SchedulerResult<bool>;
}

/// 节点组仓储抽象
#[async_trait]
pub trait NodeGroupRepository: Send + Sync {
    async fn create(&self, group: &NodeGroup) -> SchedulerResult<NodeGroup>;
    async fn find_by_id(&self, id: i64) -> SchedulerResult<Option<NodeGroup>>;
    async fn find_all(&self) -> SchedulerResult<Vec<NodeGroup>>;
    /// 更新名称、备注与成员
    async fn update(&self, group: &NodeGroup) -> SchedulerResult<NodeGroup>;
    async fn delete(&self, id: i64) -> SchedulerResult<bool>;
    async fn find_members(&self, id: i64) -> SchedulerResult<Vec<Node>>;
    async fn set_current_task(&self, id: i64, task_id: Option<Uuid>) -> SchedulerResult<()>;
    /// 仅当组当前任务为 `task_id` 时清除
    async fn clear_current_task(&self, id: i64, task_id: Uuid) -> SchedulerResult<bool>;
}

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> SchedulerResult<Task>;
    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<Task>>;
    async fn find_all(&self) -> SchedulerResult<Vec<Task>>;
    async fn find_by_status(&self, status: TaskStatus) -> SchedulerResult<Vec<Task>>;
    async fn find_active(&self) -> SchedulerResult<Vec<Task>>;
    async fn find_by_group(&self, group_id: i64) -> SchedulerResult<Vec<Task>>;
    /// 更新调度参数，仅对 Scheduled 状态的任务生效
    async fn update_schedule(&self, task: &Task) -> SchedulerResult<Task>;
    async fn delete(&self, id: Uuid) -> SchedulerResult<bool>;
    /// Scheduled -> InProgress，返回是否由本次调用完成转换
    async fn mark_in_progress(&self, id: Uuid) -> SchedulerResult<bool>;
    /// InProgress -> Completed
    async fn mark_completed(&self, id: Uuid) -> SchedulerResult<bool>;
    /// Scheduled | InProgress -> Failed
    async fn mark_failed(&self, id: Uuid) -> SchedulerResult<bool>;
    /// 追加一条失败信息，与已有内容以 `; ` 连接
    async fn append_failure(&self, id: Uuid, entry: &str) -> SchedulerResult<()>;
}
