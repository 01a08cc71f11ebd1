//! 单元测试使用的组件装配

use std::sync::Arc;
use std::time::Duration;

use logman_core::Clock;
use logman_domain::{
    entities::{Node, NodeGroup, NodeStatus, Task},
    repositories::{NodeRepository, TaskRepository},
    ArtifactLayout,
};
use logman_infrastructure::MetricsCollector;
use logman_testing_utils::{ManualClock, ScriptedNodeClient, TaskBuilder, TestDatabase};
use tempfile::TempDir;

use crate::{
    aggregator::ResultAggregator,
    controller::TaskController,
    dispatch::TaskDispatcher,
    gateway::RpcGateway,
    health_checker::{HealthChecker, HealthCheckerConfig},
    registry::NodeRegistry,
    scheduler::TaskScheduler,
};

pub struct TestEnv {
    pub db: TestDatabase,
    pub dir: TempDir,
    pub layout: ArtifactLayout,
    pub clock: Arc<ManualClock>,
    pub client: Arc<ScriptedNodeClient>,
    pub metrics: Arc<MetricsCollector>,
    pub registry: Arc<NodeRegistry>,
    pub aggregator: Arc<ResultAggregator>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub scheduler: Arc<TaskScheduler>,
    pub health: Arc<HealthChecker>,
    pub gateway: Arc<RpcGateway>,
    pub controller: Arc<TaskController>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let db = TestDatabase::new().await;
        let dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::under(dir.path());
        let clock = Arc::new(ManualClock::default());
        let client = Arc::new(ScriptedNodeClient::new());
        let metrics = Arc::new(MetricsCollector::new());

        let registry = Arc::new(NodeRegistry::new(
            db.nodes.clone(),
            db.groups.clone(),
            metrics.clone(),
        ));
        let aggregator = Arc::new(ResultAggregator::new(
            db.tasks.clone(),
            registry.clone(),
            layout.clone(),
            metrics.clone(),
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            db.tasks.clone(),
            registry.clone(),
            client.clone(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            dispatcher.clone(),
            clock.clone() as Arc<dyn Clock>,
        ));
        let health = Arc::new(HealthChecker::new(
            registry.clone(),
            client.clone(),
            clock.clone(),
            metrics.clone(),
            HealthCheckerConfig {
                interval: Duration::from_secs(60),
                probe_timeout: Duration::from_millis(200),
                eviction_threshold: 10,
                enabled: true,
            },
        ));
        let gateway = Arc::new(RpcGateway::new(
            registry.clone(),
            db.tasks.clone(),
            aggregator.clone(),
            layout.clone(),
            metrics.clone(),
        ));
        let controller = Arc::new(TaskController::new(
            registry.clone(),
            db.tasks.clone(),
            scheduler.clone(),
            health.clone(),
            client.clone(),
            layout.clone(),
            clock.clone(),
            4,
        ));

        Self {
            db,
            dir,
            layout,
            clock,
            client,
            metrics,
            registry,
            aggregator,
            dispatcher,
            scheduler,
            health,
            gateway,
            controller,
        }
    }

    pub async fn add_node(&self, hostname: &str, ip: &str) -> Node {
        self.registry
            .register(hostname, ip, 50052, None)
            .await
            .unwrap()
            .node
    }

    pub async fn add_available_node(&self, hostname: &str, ip: &str) -> Node {
        let node = self.add_node(hostname, ip).await;
        self.registry
            .update_status(node.id, NodeStatus::Available, None)
            .await
            .unwrap()
    }

    pub async fn add_group(&self, nodes: &[&Node]) -> NodeGroup {
        self.registry
            .create_group("group", "", nodes.iter().map(|n| n.id).collect())
            .await
            .unwrap()
    }

    /// 直接写入仓储的任务，开始时间为当前时钟之后一分钟
    pub async fn add_task(&self, group: &NodeGroup) -> Task {
        let task = TaskBuilder::new(group.id)
            .starting_at(self.clock.now() + chrono::Duration::minutes(1))
            .build();
        self.db.tasks.create(&task).await.unwrap()
    }

    pub async fn node(&self, id: uuid::Uuid) -> Node {
        self.db.nodes.find_by_id(id).await.unwrap().unwrap()
    }

    pub async fn task(&self, id: uuid::Uuid) -> Task {
        self.db.tasks.find_by_id(id).await.unwrap().unwrap()
    }
}
