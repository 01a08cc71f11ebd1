use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 结果文件与节点配置快照的存储位置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root_dir: PathBuf,
    pub reports_dir: String,
    pub node_configs_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            reports_dir: "Reports".to_string(),
            node_configs_dir: "nodeConfigs".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("存储根目录不能为空"));
        }

        if !self.root_dir.is_dir() {
            return Err(anyhow::anyhow!(
                "存储根目录不存在: {}",
                self.root_dir.display()
            ));
        }

        for dir in [&self.reports_dir, &self.node_configs_dir] {
            if dir.is_empty() || dir.contains("..") {
                return Err(anyhow::anyhow!("无效的存储子目录: {dir:?}"));
            }
        }

        Ok(())
    }

    pub fn reports_root(&self) -> PathBuf {
        self.root_dir.join(&self.reports_dir)
    }

    pub fn node_configs_root(&self) -> PathBuf {
        self.root_dir.join(&self.node_configs_dir)
    }
}
