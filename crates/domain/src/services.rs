//! # 领域服务模块
//!
//! 任务调度参数校验与节点时间冲突检测。这里只包含纯业务规则，
//! 数据由调用方从仓储中取出后传入。

use chrono::{DateTime, Utc};
use logman_core::{SchedulerError, SchedulerResult};
use uuid::Uuid;

use crate::entities::{Node, Task, MAX_TASK_DURATION_SECONDS};

/// 任务调度规则
pub struct ScheduleValidator;

impl ScheduleValidator {
    /// 校验任务自身的调度参数
    pub fn validate_parameters(task: &Task, now: DateTime<Utc>) -> SchedulerResult<()> {
        if task.name.trim().is_empty() {
            return Err(SchedulerError::validation_error("任务名称不能为空"));
        }
        if task.start_time < now {
            return Err(SchedulerError::validation_error(
                "Chosen start time has already passed.",
            ));
        }
        if task.duration_seconds == 0 {
            return Err(SchedulerError::validation_error("采集时长必须大于0"));
        }
        if task.duration_seconds > MAX_TASK_DURATION_SECONDS {
            return Err(SchedulerError::validation_error(format!(
                "采集时长不能超过 {MAX_TASK_DURATION_SECONDS} 秒"
            )));
        }
        if task.interval_seconds == 0 {
            return Err(SchedulerError::validation_error("采样间隔必须大于0"));
        }
        Ok(())
    }

    /// 找出与候选任务时间窗口重叠、且共享节点的活动任务，返回冲突节点的 IP
    ///
    /// `active` 中与候选任务同 id 的条目(修改自身时)会被忽略。
    pub fn find_conflicts(
        candidate: &Task,
        candidate_nodes: &[Node],
        active: &[(Task, Vec<Node>)],
    ) -> Vec<String> {
        let mut conflicting: Vec<Uuid> = Vec::new();

        for (other, other_nodes) in active {
            if other.id == candidate.id || !other.is_active() || !candidate.overlaps(other) {
                continue;
            }
            for node in candidate_nodes {
                if other_nodes.iter().any(|n| n.id == node.id) && !conflicting.contains(&node.id) {
                    conflicting.push(node.id);
                }
            }
        }

        candidate_nodes
            .iter()
            .filter(|n| conflicting.contains(&n.id))
            .map(|n| n.ip.clone())
            .collect()
    }

    /// 存在冲突时返回 [`SchedulerError::ScheduleConflict`]
    pub fn ensure_no_conflicts(
        candidate: &Task,
        candidate_nodes: &[Node],
        active: &[(Task, Vec<Node>)],
    ) -> SchedulerResult<()> {
        let node_ips = Self::find_conflicts(candidate, candidate_nodes, active);
        if node_ips.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::ScheduleConflict { node_ips })
        }
    }
}
