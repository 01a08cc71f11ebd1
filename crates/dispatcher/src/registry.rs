use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use logman_core::{SchedulerError, SchedulerResult};
use logman_domain::{
    entities::{Node, NodeGroup, NodeStatus},
    repositories::{NodeGroupRepository, NodeRepository},
};
use logman_infrastructure::MetricsCollector;

/// 比较并写入在并发修改下的最大重试次数
const MAX_CAS_ATTEMPTS: usize = 3;

/// 注册结果
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub node: Node,
    pub created: bool,
}

/// 为任务占用节点的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// 占用成功，记录占用前的状态以便失败时恢复
    Claimed { previous: NodeStatus },
    /// 节点已被其他任务占用
    AlreadyBusy { task: Option<Uuid> },
}

/// 节点注册表
///
/// 维护节点与节点组的生命周期。所有状态写入都是单行条件更新，
/// 与健康检查和任务分发并发执行时不会互相覆盖。
pub struct NodeRegistry {
    node_repo: Arc<dyn NodeRepository>,
    group_repo: Arc<dyn NodeGroupRepository>,
    metrics: Arc<MetricsCollector>,
    register_lock: Mutex<()>,
}

impl NodeRegistry {
    pub fn new(
        node_repo: Arc<dyn NodeRepository>,
        group_repo: Arc<dyn NodeGroupRepository>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            node_repo,
            group_repo,
            metrics,
            register_lock: Mutex::new(()),
        }
    }

    /// 注册节点
    ///
    /// 按 (hostname, ip) 不区分大小写查找已有节点：找到则只刷新端口并返回原 UUID，
    /// 否则以调用方提供的 UUID(或新生成的 UUID)创建离线节点。
    pub async fn register(
        &self,
        hostname: &str,
        ip: &str,
        port: u16,
        client_id: Option<Uuid>,
    ) -> SchedulerResult<RegistrationOutcome> {
        let hostname = hostname.trim();
        let ip = ip.trim();
        if hostname.is_empty() || ip.is_empty() {
            return Err(SchedulerError::validation_error("hostname 和 ip 不能为空"));
        }
        if port == 0 {
            return Err(SchedulerError::validation_error("端口必须大于0"));
        }

        let _guard = self.register_lock.lock().await;
        self.metrics.record_registration();

        if let Some(mut existing) = self.node_repo.find_by_host(hostname, ip).await? {
            if existing.port != port {
                self.node_repo.update_port(existing.id, port).await?;
                existing.port = port;
            }
            info!(
                "节点重新注册: {} {} 端口 {} (id={})",
                hostname, ip, port, existing.id
            );
            return Ok(RegistrationOutcome {
                node: existing,
                created: false,
            });
        }

        let id = client_id.unwrap_or_else(Uuid::new_v4);
        if self.node_repo.find_by_id(id).await?.is_some() {
            return Err(SchedulerError::validation_error(format!(
                "UUID {id} 已被其他节点使用"
            )));
        }

        let node = self
            .node_repo
            .create(&Node::new(hostname, ip, port).with_id(id))
            .await?;
        info!("注册新节点: {} {} 端口 {} (id={})", hostname, ip, port, node.id);

        Ok(RegistrationOutcome {
            node,
            created: true,
        })
    }

    pub async fn get(&self, id: Uuid) -> SchedulerResult<Node> {
        self.node_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| SchedulerError::node_not_found(id))
    }

    pub async fn list(&self) -> SchedulerResult<Vec<Node>> {
        self.node_repo.find_all().await
    }

    pub async fn list_by_status(&self, status: NodeStatus) -> SchedulerResult<Vec<Node>> {
        self.node_repo.find_by_status(status).await
    }

    /// 当前分配给指定任务的节点
    pub async fn nodes_for_task(&self, task_id: Uuid) -> SchedulerResult<Vec<Node>> {
        self.node_repo.find_by_task(task_id).await
    }

    /// 修改节点状态
    ///
    /// Busy 必须携带任务；其他状态一律清空当前任务。Busy 节点不能直接转为 Offline，
    /// 只能经由完成/失败路径释放或被删除。
    pub async fn update_status(
        &self,
        id: Uuid,
        status: NodeStatus,
        current_task: Option<Uuid>,
    ) -> SchedulerResult<Node> {
        let current_task = match status {
            NodeStatus::Busy => Some(current_task.ok_or_else(|| {
                SchedulerError::validation_error("Busy 状态必须指定当前任务")
            })?),
            _ => None,
        };

        for _ in 0..MAX_CAS_ATTEMPTS {
            let node = self.get(id).await?;
            if node.status == NodeStatus::Busy && status == NodeStatus::Offline {
                return Err(SchedulerError::invalid_state(format!(
                    "节点 {} 正在执行任务，不能标记为离线",
                    node.label()
                )));
            }

            if self
                .node_repo
                .compare_and_set_status(id, node.status, status, current_task)
                .await?
            {
                debug!("节点 {} 状态: {} -> {}", node.label(), node.status, status);
                return self.get(id).await;
            }
        }

        Err(SchedulerError::invalid_state(format!(
            "节点 {id} 状态并发修改冲突"
        )))
    }

    /// 为任务占用节点：只有非 Busy 节点可以被占用，同一节点不会被两个任务同时占用
    pub async fn claim_for_task(&self, id: Uuid, task_id: Uuid) -> SchedulerResult<ClaimOutcome> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let node = self.get(id).await?;
            if node.is_busy() {
                return Ok(ClaimOutcome::AlreadyBusy {
                    task: node.current_task,
                });
            }

            if self
                .node_repo
                .compare_and_set_status(id, node.status, NodeStatus::Busy, Some(task_id))
                .await?
            {
                return Ok(ClaimOutcome::Claimed {
                    previous: node.status,
                });
            }
        }

        let node = self.get(id).await?;
        Ok(ClaimOutcome::AlreadyBusy {
            task: node.current_task,
        })
    }

    /// 仅当节点仍分配给该任务时释放节点
    pub async fn release(&self, id: Uuid, task_id: Uuid, status: NodeStatus) -> SchedulerResult<bool> {
        let released = self.node_repo.release_task(id, task_id, status).await?;
        if released {
            debug!("节点 {} 已从任务 {} 释放，状态 {}", id, task_id, status);
        }
        Ok(released)
    }

    /// 永久移除节点，节点组成员关系随之删除
    pub async fn evict(&self, id: Uuid) -> SchedulerResult<bool> {
        let node = self.node_repo.find_by_id(id).await?;
        let removed = self.node_repo.delete(id).await?;
        if removed {
            self.metrics.record_eviction();
            match node {
                Some(node) => warn!("节点 {} 已被移除 (id={})", node.label(), id),
                None => warn!("节点已被移除 (id={})", id),
            }
        }
        Ok(removed)
    }

    pub(crate) async fn reset_idle_to_offline(&self) -> SchedulerResult<u64> {
        self.node_repo.reset_idle_to_offline().await
    }

    pub(crate) async fn mark_available_if_idle(&self, id: Uuid) -> SchedulerResult<bool> {
        self.node_repo.mark_available_if_idle(id).await
    }

    // 节点组

    pub async fn create_group(
        &self,
        name: &str,
        comments: &str,
        node_ids: Vec<Uuid>,
    ) -> SchedulerResult<NodeGroup> {
        if name.trim().is_empty() {
            return Err(SchedulerError::validation_error("节点组名称不能为空"));
        }
        self.ensure_nodes_exist(&node_ids).await?;

        let group = self
            .group_repo
            .create(&NodeGroup::new(name.trim(), node_ids).with_comments(comments))
            .await?;
        info!("创建节点组 {} (id={}, {} 个节点)", group.name, group.id, group.node_ids.len());
        Ok(group)
    }

    pub async fn update_group(
        &self,
        id: i64,
        name: &str,
        comments: &str,
        node_ids: Vec<Uuid>,
    ) -> SchedulerResult<NodeGroup> {
        if name.trim().is_empty() {
            return Err(SchedulerError::validation_error("节点组名称不能为空"));
        }
        self.ensure_nodes_exist(&node_ids).await?;

        let mut group = self.get_group(id).await?;
        group.name = name.trim().to_string();
        group.comments = comments.to_string();
        group.node_ids = node_ids;
        self.group_repo.update(&group).await
    }

    pub async fn delete_group(&self, id: i64) -> SchedulerResult<bool> {
        let removed = self.group_repo.delete(id).await?;
        if removed {
            info!("删除节点组 {}", id);
        }
        Ok(removed)
    }

    pub async fn get_group(&self, id: i64) -> SchedulerResult<NodeGroup> {
        self.group_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| SchedulerError::group_not_found(id))
    }

    pub async fn list_groups(&self) -> SchedulerResult<Vec<NodeGroup>> {
        self.group_repo.find_all().await
    }

    pub async fn group_members(&self, id: i64) -> SchedulerResult<Vec<Node>> {
        self.group_repo.find_members(id).await
    }

    /// 组内各状态节点数量
    pub async fn group_status_counts(&self, id: i64) -> SchedulerResult<GroupStatusCounts> {
        let members = self.group_members(id).await?;
        let mut counts = GroupStatusCounts::default();
        for node in &members {
            match node.status {
                NodeStatus::Offline => counts.offline += 1,
                NodeStatus::Available => counts.available += 1,
                NodeStatus::Busy => counts.busy += 1,
            }
        }
        Ok(counts)
    }

    pub async fn set_group_task(&self, id: i64, task_id: Uuid) -> SchedulerResult<()> {
        self.group_repo.set_current_task(id, Some(task_id)).await
    }

    pub async fn clear_group_task(&self, id: i64, task_id: Uuid) -> SchedulerResult<bool> {
        self.group_repo.clear_current_task(id, task_id).await
    }

    async fn ensure_nodes_exist(&self, node_ids: &[Uuid]) -> SchedulerResult<()> {
        for id in node_ids {
            if self.node_repo.find_by_id(*id).await?.is_none() {
                return Err(SchedulerError::node_not_found(*id));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStatusCounts {
    pub offline: usize,
    pub available: usize,
    pub busy: usize,
}
