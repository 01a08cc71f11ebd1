use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use logman::{
    app::Application,
    common::{init_logging, wait_for_shutdown_signal},
    shutdown::ShutdownManager,
};
use logman_core::AppConfig;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("logman")
        .version(env!("CARGO_PKG_VERSION"))
        .about("日志采集节点集群控制器")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/logman.toml、logman.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path).context("加载配置失败")?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level);
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    info!("启动日志采集控制器");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);

        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    tokio::select! {
        result = wait_for_shutdown_signal() => {
            result?;
            info!("收到关闭信号，开始优雅关闭...");
        }
        result = &mut app_handle => {
            error!("控制器提前退出");
            return result.context("控制器任务异常终止")?;
        }
    }

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(Ok(()))) => info!("控制器已优雅关闭"),
        Ok(Ok(Err(e))) => error!("控制器关闭时发生错误: {e}"),
        Ok(Err(e)) => error!("控制器任务异常终止: {e}"),
        Err(_) => warn!("控制器关闭超时，强制退出"),
    }

    Ok(())
}
