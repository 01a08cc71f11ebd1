use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use logman_api::{create_app, AppState};
use logman_core::{AppConfig, Clock, NodeClient, SystemClock};
use logman_dispatcher::{
    HealthChecker, HealthCheckerConfig, NodeRegistry, ResultAggregator, RpcGateway,
    TaskController, TaskDispatcher, TaskScheduler,
};
use logman_domain::ArtifactLayout;
use logman_infrastructure::{
    init_metrics_exporter, DatabaseManager, HttpNodeClient, HttpNodeClientConfig,
    MetricsCollector, SqliteNodeGroupRepository, SqliteNodeRepository, SqliteTaskRepository,
};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

/// 控制器进程
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    registry: Arc<NodeRegistry>,
    scheduler: Arc<TaskScheduler>,
    health: Arc<HealthChecker>,
    gateway: Arc<RpcGateway>,
    controller: Arc<TaskController>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let client = HttpNodeClient::new(HttpNodeClientConfig::from(&config.rpc))
            .context("创建节点客户端失败")?;
        Self::with_node_client(config, Arc::new(client)).await
    }

    /// 使用给定的出站客户端装配所有组件
    pub async fn with_node_client(config: AppConfig, client: Arc<dyn NodeClient>) -> Result<Self> {
        info!("初始化控制器");

        if config.observability.metrics_enabled {
            let addr: SocketAddr = config
                .observability
                .metrics_bind_address
                .parse()
                .context("无效的指标监听地址")?;
            init_metrics_exporter(addr)?;
        }

        let database = DatabaseManager::new(&config.database).await?;
        database.migrate().await?;
        let pool = database.pool().clone();
        info!("数据库连接成功");

        let node_repo = Arc::new(SqliteNodeRepository::new(pool.clone()));
        let group_repo = Arc::new(SqliteNodeGroupRepository::new(pool.clone()));
        let task_repo = Arc::new(SqliteTaskRepository::new(pool));

        let metrics = Arc::new(MetricsCollector::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let layout = ArtifactLayout::new(
            config.storage.reports_root(),
            config.storage.node_configs_root(),
        );

        let registry = Arc::new(NodeRegistry::new(node_repo, group_repo, metrics.clone()));
        let aggregator = Arc::new(ResultAggregator::new(
            task_repo.clone(),
            registry.clone(),
            layout.clone(),
            metrics.clone(),
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            task_repo.clone(),
            registry.clone(),
            client.clone(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(TaskScheduler::new(dispatcher, clock.clone()));
        let health = Arc::new(HealthChecker::new(
            registry.clone(),
            client.clone(),
            clock.clone(),
            metrics.clone(),
            HealthCheckerConfig::from_config(&config.health, &config.rpc),
        ));
        let gateway = Arc::new(RpcGateway::new(
            registry.clone(),
            task_repo.clone(),
            aggregator,
            layout.clone(),
            metrics,
        ));
        let controller = Arc::new(TaskController::new(
            registry.clone(),
            task_repo,
            scheduler.clone(),
            health.clone(),
            client,
            layout,
            clock,
            config.scheduler.default_interval_seconds,
        ));

        Ok(Self {
            config,
            database,
            registry,
            scheduler,
            health,
            gateway,
            controller,
        })
    }

    pub fn controller(&self) -> Arc<TaskController> {
        Arc::clone(&self.controller)
    }

    pub fn registry(&self) -> Arc<NodeRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn health(&self) -> Arc<HealthChecker> {
        Arc::clone(&self.health)
    }

    pub fn router(&self) -> Router {
        create_app(AppState {
            gateway: Arc::clone(&self.gateway),
            registry: Arc::clone(&self.registry),
            max_frame: self.config.rpc.max_frame_bytes,
        })
    }

    /// 在配置的地址上运行，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let bind_address = &self.config.rpc.bind_address;
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {bind_address}"))?;

        self.serve(listener, shutdown_rx).await
    }

    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        if self.config.scheduler.restore_on_startup {
            let restored = self.controller.restore_schedule().await?;
            info!("已恢复 {} 个待执行任务", restored);
        }

        let health_handle = {
            let health = Arc::clone(&self.health);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { health.run(shutdown_rx).await })
        };

        info!("RPC服务启动在 {}", listener.local_addr()?);
        let server = axum::serve(listener, self.router()).with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("RPC服务收到关闭信号");
        });
        if let Err(e) = server.await {
            error!("RPC服务运行失败: {}", e);
        }

        self.scheduler.shutdown().await;
        if let Err(e) = health_handle.await {
            error!("健康检查循环异常退出: {}", e);
        }
        self.database.close().await;

        info!("控制器已停止");
        Ok(())
    }
}
