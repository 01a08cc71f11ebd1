//! 节点客户端与时钟的测试替身

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use logman_core::{
    errors::{RpcError, RpcResult},
    rpc::StartJobRequest,
    transfer::{chunk_stream_from, ChunkStream},
    Clock, NodeClient,
};
use tokio::sync::watch;

/// 节点客户端收到的一次调用
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    IsAlive(String),
    StartJob {
        address: String,
        request: StartJobRequest,
    },
    PushConfig {
        address: String,
        config: Bytes,
    },
    PullConfig {
        address: String,
        chunk_size_kb: u32,
    },
}

impl RecordedCall {
    pub fn address(&self) -> &str {
        match self {
            RecordedCall::IsAlive(address) => address,
            RecordedCall::StartJob { address, .. }
            | RecordedCall::PushConfig { address, .. }
            | RecordedCall::PullConfig { address, .. } => address,
        }
    }
}

#[derive(Default)]
struct ScriptState {
    unreachable: HashSet<String>,
    start_failures: HashMap<String, String>,
    push_rejections: HashSet<String>,
    job_output: HashMap<String, Vec<u8>>,
    configs: HashMap<String, Vec<u8>>,
    calls: Vec<RecordedCall>,
}

/// 按地址预设行为的节点客户端
///
/// 默认所有地址可达、启动任务成功并回传一小段输出。
#[derive(Default)]
pub struct ScriptedNodeClient {
    state: Mutex<ScriptState>,
    probe_delay: Mutex<Option<Duration>>,
}

impl ScriptedNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) {
        let mut state = self.state.lock().unwrap();
        if reachable {
            state.unreachable.remove(address);
        } else {
            state.unreachable.insert(address.to_string());
        }
    }

    /// 该地址的 StartJob 调用将以给定消息失败
    pub fn fail_start_job(&self, address: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .start_failures
            .insert(address.to_string(), message.to_string());
    }

    /// 该地址的 PushConfig 调用返回 `success = false`
    pub fn reject_push(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .push_rejections
            .insert(address.to_string());
    }

    pub fn set_job_output(&self, address: &str, output: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .job_output
            .insert(address.to_string(), output.to_vec());
    }

    pub fn set_config(&self, address: &str, config: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .configs
            .insert(address.to_string(), config.to_vec());
    }

    pub fn config(&self, address: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().configs.get(address).cloned()
    }

    /// 每次存活探测前等待的时间，用于模拟超时
    pub fn set_probe_delay(&self, delay: Option<Duration>) {
        *self.probe_delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn probe_count(&self, address: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RecordedCall::IsAlive(a) if a == address))
            .count()
    }

    pub fn start_job_calls(&self) -> Vec<(String, StartJobRequest)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::StartJob { address, request } => Some((address, request)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn record(&self, call: RecordedCall) -> bool {
        let mut state = self.state.lock().unwrap();
        let reachable = !state.unreachable.contains(call.address());
        state.calls.push(call);
        reachable
    }

    fn refused(address: &str) -> RpcError {
        RpcError::transport(format!("连接 {address} 被拒绝"))
    }
}

#[async_trait]
impl NodeClient for ScriptedNodeClient {
    async fn is_alive(&self, address: &str) -> RpcResult<()> {
        let delay = *self.probe_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.record(RecordedCall::IsAlive(address.to_string())) {
            Ok(())
        } else {
            Err(Self::refused(address))
        }
    }

    async fn start_job(&self, address: &str, request: &StartJobRequest) -> RpcResult<ChunkStream> {
        let reachable = self.record(RecordedCall::StartJob {
            address: address.to_string(),
            request: request.clone(),
        });
        if !reachable {
            return Err(Self::refused(address));
        }

        let state = self.state.lock().unwrap();
        if let Some(message) = state.start_failures.get(address) {
            return Err(RpcError::Rejected {
                status: 500,
                message: message.clone(),
            });
        }
        let output = state
            .job_output
            .get(address)
            .cloned()
            .unwrap_or_else(|| format!("{} started", request.job_name).into_bytes());
        Ok(chunk_stream_from(Bytes::from(output), 1024))
    }

    async fn push_config(&self, address: &str, config: Bytes) -> RpcResult<bool> {
        let reachable = self.record(RecordedCall::PushConfig {
            address: address.to_string(),
            config: config.clone(),
        });
        if !reachable {
            return Err(Self::refused(address));
        }

        let mut state = self.state.lock().unwrap();
        if state.push_rejections.contains(address) {
            return Ok(false);
        }
        state.configs.insert(address.to_string(), config.to_vec());
        Ok(true)
    }

    async fn pull_config(&self, address: &str, chunk_size_kb: u32) -> RpcResult<ChunkStream> {
        let reachable = self.record(RecordedCall::PullConfig {
            address: address.to_string(),
            chunk_size_kb,
        });
        if !reachable {
            return Err(Self::refused(address));
        }

        let config = self
            .state
            .lock()
            .unwrap()
            .configs
            .get(address)
            .cloned()
            .unwrap_or_default();
        Ok(chunk_stream_from(
            Bytes::from(config),
            chunk_size_kb.max(1) as usize * 1024,
        ))
    }
}

/// 手动推进的时钟
///
/// `sleep` 与 `sleep_until` 只有在 [`ManualClock::advance`] 越过目标时刻后才返回。
pub struct ManualClock {
    now: watch::Sender<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        let (now, _) = watch::channel(start);
        Self { now }
    }

    pub fn advance(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap();
        self.now.send_modify(|now| *now += step);
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        self.now.send_replace(instant);
    }

    /// 当前有多少个等待者
    pub fn waiters(&self) -> usize {
        self.now.receiver_count()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + chrono::Duration::from_std(duration).unwrap();
        self.sleep_until(deadline).await;
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut rx = self.now.subscribe();
        loop {
            if *rx.borrow_and_update() >= deadline {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
