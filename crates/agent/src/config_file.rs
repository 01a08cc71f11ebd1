use std::path::{Path, PathBuf};

use logman_core::{transfer::write_atomic, SchedulerError, SchedulerResult};
use tracing::info;

/// 节点本地的配置文件
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> SchedulerResult<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(|e| {
            SchedulerError::storage_error(format!("读取配置 {} 失败: {e}", self.path.display()))
        })
    }

    /// 原子地替换配置文件
    pub async fn store(&self, data: Vec<u8>) -> SchedulerResult<()> {
        let path = self.path.clone();
        let size = data.len();
        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|e| SchedulerError::Internal(format!("写入配置中断: {e}")))??;

        info!("配置已更新: {} ({} 字节)", self.path.display(), size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::new(dir.path().join("conf").join("agent.ini"));

        assert!(file.load().await.is_err());

        file.store(b"[collect]\ninterval=4\n".to_vec()).await.unwrap();
        assert_eq!(file.load().await.unwrap(), b"[collect]\ninterval=4\n");

        file.store(b"[collect]\ninterval=8\n".to_vec()).await.unwrap();
        assert_eq!(file.load().await.unwrap(), b"[collect]\ninterval=8\n");
    }
}
