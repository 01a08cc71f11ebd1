use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    dispatcher::{HealthConfig, SchedulerConfig},
    observability::ObservabilityConfig,
    rpc::RpcConfig,
    storage::StorageConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub rpc: RpcConfig,
    pub health: HealthConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: LOGMAN_, nested keys joined by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/logman.toml", "logman.toml", "/etc/logman/config.toml"];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("LOGMAN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.rpc.validate().context("RPC配置验证失败")?;
        self.health.validate().context("健康检查配置验证失败")?;
        self.scheduler.validate().context("调度配置验证失败")?;
        self.storage.validate().context("存储配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rpc.bind_address, "0.0.0.0:50051");
        assert_eq!(config.rpc.probe_timeout_seconds, 2);
        assert_eq!(config.health.interval_seconds, 60);
        assert_eq!(config.health.eviction_threshold, 10);
        assert_eq!(config.scheduler.default_interval_seconds, 4);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [health]
            interval_seconds = 15

            [rpc]
            bind_address = "127.0.0.1:6000"
            "#,
        )
        .unwrap();

        assert_eq!(config.health.interval_seconds, 15);
        assert_eq!(config.health.eviction_threshold, 10);
        assert_eq!(config.rpc.bind_address, "127.0.0.1:6000");
        assert_eq!(config.storage.reports_dir, "Reports");
    }

    #[test]
    fn test_missing_storage_root_is_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [storage]
            root_dir = "/definitely/not/a/real/logman/root"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(AppConfig::from_toml("[health]\neviction_threshold = 0").is_err());
        assert!(AppConfig::from_toml("[rpc]\nbind_address = \"nowhere\"").is_err());
        assert!(AppConfig::from_toml("[database]\nurl = \"postgres://x\"").is_err());
        assert!(AppConfig::from_toml("[observability]\nlog_format = \"xml\"").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.rpc.chunk_size_bytes, config.rpc.chunk_size_bytes);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/no/such/logman.toml")).is_err());
    }
}
