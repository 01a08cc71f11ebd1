use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info};
use uuid::Uuid;

use logman_core::{Clock, SchedulerResult};
use logman_domain::entities::Task;

use crate::dispatch::{DispatchOutcome, TaskDispatcher};

struct PendingDispatch {
    generation: u64,
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    dispatcher: Arc<TaskDispatcher>,
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<Uuid, PendingDispatch>>,
    next_generation: AtomicU64,
}

/// 一次性任务调度器
///
/// 每个任务在开始时间触发一次分发。同一任务重复入队时替换原有的等待，
/// 已触发的分发不受取消影响。
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn new(dispatcher: Arc<TaskDispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                dispatcher,
                clock,
                pending: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// 安排任务在其开始时间分发；开始时间已过则立即分发
    pub async fn enqueue(&self, task: &Task) {
        let task_id = task.id;
        let fire_at = task.start_time;
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut pending = self.inner.pending.lock().await;
        if let Some(previous) = pending.remove(&task_id) {
            previous.handle.abort();
            debug!(
                "替换任务 {} 的调度: {} -> {}",
                task_id, previous.fire_at, fire_at
            );
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.clock.sleep_until(fire_at).await;

            {
                let mut pending = inner.pending.lock().await;
                match pending.get(&task_id) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&task_id);
                    }
                    _ => return,
                }
            }

            match inner.dispatcher.dispatch(task_id).await {
                Ok(DispatchOutcome::Skipped { .. }) => {}
                Ok(DispatchOutcome::Dispatched(report)) => debug!(
                    "任务 {} 分发完成: 成功 {}，失败 {}",
                    task_id,
                    report.started.len(),
                    report.failed.len()
                ),
                Err(e) => error!("分发任务 {} 时出错: {}", task_id, e),
            }
        });

        pending.insert(
            task_id,
            PendingDispatch {
                generation,
                fire_at,
                handle,
            },
        );
        info!("任务 {} ({}) 已安排在 {} 执行", task.name, task_id, fire_at);
    }

    /// 取消尚未触发的分发，返回是否存在这样的分发
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        match self.inner.pending.lock().await.remove(&task_id) {
            Some(entry) => {
                entry.handle.abort();
                info!("已取消任务 {} 的调度", task_id);
                true
            }
            None => false,
        }
    }

    pub async fn is_pending(&self, task_id: Uuid) -> bool {
        self.inner.pending.lock().await.contains_key(&task_id)
    }

    pub async fn fire_time(&self, task_id: Uuid) -> Option<DateTime<Utc>> {
        self.inner
            .pending
            .lock()
            .await
            .get(&task_id)
            .map(|entry| entry.fire_at)
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// 立即分发，不经过等待
    pub async fn dispatch_now(&self, task_id: Uuid) -> SchedulerResult<DispatchOutcome> {
        self.cancel(task_id).await;
        self.inner.dispatcher.dispatch(task_id).await
    }

    /// 放弃所有尚未触发的分发
    pub async fn shutdown(&self) {
        let mut pending = self.inner.pending.lock().await;
        let count = pending.len();
        for (_, entry) in pending.drain() {
            entry.handle.abort();
        }
        info!("调度器已停止，放弃 {} 个待执行任务", count);
    }
}
