use serde::{Deserialize, Serialize};

/// 健康检查配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    /// 两次巡检之间的间隔(秒)
    pub interval_seconds: u64,
    /// 连续探测失败多少次后移除节点
    pub eviction_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            eviction_threshold: 10,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("健康检查间隔必须大于0"));
        }

        if self.eviction_threshold == 0 {
            return Err(anyhow::anyhow!("节点移除阈值必须大于0"));
        }

        Ok(())
    }
}

/// 任务调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 启动时是否恢复尚未触发的任务
    pub restore_on_startup: bool,
    /// 创建任务时未指定采样间隔使用的默认值(秒)
    pub default_interval_seconds: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            restore_on_startup: true,
            default_interval_seconds: 4,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_interval_seconds == 0 {
            return Err(anyhow::anyhow!("默认采样间隔必须大于0"));
        }

        Ok(())
    }
}
