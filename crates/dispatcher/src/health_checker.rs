use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use logman_core::{
    config::models::{HealthConfig, RpcConfig},
    errors::{RpcError, RpcResult},
    Clock, NodeClient, SchedulerResult,
};
use logman_domain::entities::Node;
use logman_infrastructure::MetricsCollector;

use crate::registry::NodeRegistry;

/// 健康检查配置
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// 两次巡检之间的间隔
    pub interval: Duration,
    /// 单次存活探测的超时
    pub probe_timeout: Duration,
    /// 连续失败达到该次数后移除节点
    pub eviction_threshold: u32,
    /// 关闭后不启动周期巡检，按需探测仍然可用
    pub enabled: bool,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(2),
            eviction_threshold: 10,
            enabled: true,
        }
    }
}

impl HealthCheckerConfig {
    pub fn from_config(health: &HealthConfig, rpc: &RpcConfig) -> Self {
        Self {
            interval: Duration::from_secs(health.interval_seconds),
            probe_timeout: rpc.probe_timeout(),
            eviction_threshold: health.eviction_threshold,
            enabled: health.enabled,
        }
    }
}

/// 单个节点的连续失败记录
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// 一次巡检的结果
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub probed: usize,
    pub skipped_busy: usize,
    pub available: Vec<Uuid>,
    pub unreachable: Vec<Uuid>,
    pub evicted: Vec<Uuid>,
}

/// 健康检查服务接口
#[async_trait]
pub trait HealthCheckService: Send + Sync {
    /// 执行一次全量巡检
    async fn sweep(&self) -> SchedulerResult<SweepReport>;

    /// 探测给定节点，返回其中可达的节点，不修改任何状态
    async fn check_nodes(&self, nodes: &[Node]) -> Vec<Node>;
}

/// 节点健康检查
///
/// 周期性地探测所有空闲节点：可达的标记为 Available，不可达的保持 Offline
/// 并累计失败次数，连续失败达到阈值后移除。Busy 节点不探测也不修改。
pub struct HealthChecker {
    registry: Arc<NodeRegistry>,
    client: Arc<dyn NodeClient>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    config: HealthCheckerConfig,
    retry_states: Mutex<HashMap<Uuid, RetryState>>,
    sweep_lock: Mutex<()>,
}

impl HealthChecker {
    pub fn new(
        registry: Arc<NodeRegistry>,
        client: Arc<dyn NodeClient>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
        config: HealthCheckerConfig,
    ) -> Self {
        Self {
            registry,
            client,
            clock,
            metrics,
            config,
            retry_states: Mutex::new(HashMap::new()),
            sweep_lock: Mutex::new(()),
        }
    }

    pub async fn retry_state(&self, node_id: Uuid) -> RetryState {
        self.retry_states
            .lock()
            .await
            .get(&node_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 周期巡检，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("节点健康检查已关闭");
            return;
        }
        info!(
            "启动节点健康检查，间隔 {} 秒，移除阈值 {} 次",
            self.config.interval.as_secs(),
            self.config.eviction_threshold
        );

        loop {
            match self.sweep().await {
                Ok(report) => {
                    if !report.evicted.is_empty() {
                        info!("本轮巡检移除了 {} 个节点", report.evicted.len());
                    }
                }
                Err(e) => error!("节点健康巡检时出错: {}", e),
            }

            tokio::select! {
                _ = self.clock.sleep(self.config.interval) => {}
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，退出节点健康检查");
                    break;
                }
            }
        }
    }

    async fn probe(&self, node: &Node) -> RpcResult<()> {
        let timeout = self.config.probe_timeout;
        match tokio::time::timeout(timeout, self.client.is_alive(&node.address())).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(timeout)),
        }
    }

    async fn handle_probe_failure(
        &self,
        node: &Node,
        error: &RpcError,
        report: &mut SweepReport,
    ) -> SchedulerResult<()> {
        self.metrics.record_probe_failure();

        let failures = {
            let mut states = self.retry_states.lock().await;
            let state = states.entry(node.id).or_default();
            state.consecutive_failures += 1;
            state.last_error = Some(error.to_string());
            state.consecutive_failures
        };
        debug!(
            "节点 {} 探测失败 ({}/{}): {}",
            node.label(),
            failures,
            self.config.eviction_threshold,
            error
        );

        if failures < self.config.eviction_threshold {
            report.unreachable.push(node.id);
            return Ok(());
        }

        // 巡检期间被分发占用的节点不移除
        if self.registry.get(node.id).await?.is_busy() {
            report.unreachable.push(node.id);
            return Ok(());
        }

        warn!(
            "节点 {} 连续 {} 次探测失败，移除该节点",
            node.label(),
            failures
        );
        self.retry_states.lock().await.remove(&node.id);
        if self.registry.evict(node.id).await? {
            report.evicted.push(node.id);
        }
        Ok(())
    }
}

#[async_trait]
impl HealthCheckService for HealthChecker {
    async fn sweep(&self) -> SchedulerResult<SweepReport> {
        let _guard = self.sweep_lock.lock().await;
        let started = Instant::now();

        let nodes = self.registry.list().await?;
        let (busy, idle): (Vec<Node>, Vec<Node>) = nodes.into_iter().partition(Node::is_busy);

        let mut report = SweepReport {
            probed: idle.len(),
            skipped_busy: busy.len(),
            ..Default::default()
        };

        self.registry.reset_idle_to_offline().await?;

        let results = join_all(idle.iter().map(|node| async move { (node, self.probe(node).await) })).await;

        for (node, result) in results {
            match result {
                Ok(()) => {
                    self.retry_states.lock().await.remove(&node.id);
                    if self.registry.mark_available_if_idle(node.id).await? {
                        report.available.push(node.id);
                    }
                }
                Err(e) => self.handle_probe_failure(node, &e, &mut report).await?,
            }
        }

        {
            let known: Vec<Uuid> = idle.iter().chain(busy.iter()).map(|n| n.id).collect();
            self.retry_states
                .lock()
                .await
                .retain(|id, _| known.contains(id));
        }

        self.metrics
            .record_sweep(report.available.len(), started.elapsed().as_secs_f64());
        debug!(
            "巡检完成: 探测 {} 个，可用 {} 个，不可达 {} 个，跳过忙碌 {} 个",
            report.probed,
            report.available.len(),
            report.unreachable.len(),
            report.skipped_busy
        );

        Ok(report)
    }

    async fn check_nodes(&self, nodes: &[Node]) -> Vec<Node> {
        let results = join_all(nodes.iter().map(|node| async move { (node, self.probe(node).await) })).await;

        results
            .into_iter()
            .filter_map(|(node, result)| match result {
                Ok(()) => Some(node.clone()),
                Err(e) => {
                    debug!("节点 {} 不可达: {}", node.label(), e);
                    None
                }
            })
            .collect()
    }
}
