use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 时间源抽象
///
/// 调度器与健康检查通过它读取当前时间和等待，测试中可替换为手动推进的时钟。
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    /// 等待到指定时刻；时刻已过则立即返回
    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        if let Ok(remaining) = (deadline - self.now()).to_std() {
            self.sleep(remaining).await;
        }
    }
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
