use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use logman_core::{
    config::models::RpcConfig,
    errors::{RpcError, RpcResult},
    rpc::{paths, PullConfigRequest, RpcReply, StartJobRequest},
    transfer::{decode_chunk_stream, encode_chunks, ChunkStream},
    NodeClient, SchedulerError, SchedulerResult,
};
use tracing::debug;

/// 出站调用参数
#[derive(Debug, Clone)]
pub struct HttpNodeClientConfig {
    pub probe_timeout: Duration,
    pub call_timeout: Duration,
    pub chunk_size: usize,
    pub max_frame: usize,
}

impl From<&RpcConfig> for HttpNodeClientConfig {
    fn from(config: &RpcConfig) -> Self {
        Self {
            probe_timeout: config.probe_timeout(),
            call_timeout: config.call_timeout(),
            chunk_size: config.chunk_size_bytes,
            max_frame: config.max_frame_bytes,
        }
    }
}

/// 基于 HTTP 的节点客户端
pub struct HttpNodeClient {
    http_client: reqwest::Client,
    config: HttpNodeClientConfig,
}

impl HttpNodeClient {
    pub fn new(config: HttpNodeClientConfig) -> SchedulerResult<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.probe_timeout)
            .build()
            .map_err(|e| SchedulerError::Internal(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn url(address: &str, path: &str) -> String {
        format!("http://{address}{path}")
    }

    fn map_send_error(err: reqwest::Error, timeout: Duration) -> RpcError {
        if err.is_timeout() {
            RpcError::Timeout(timeout)
        } else {
            RpcError::transport(err.to_string())
        }
    }

    /// 在限定时间内发出请求并等到响应头
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> RpcResult<reqwest::Response> {
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| RpcError::Timeout(timeout))?
            .map_err(|e| Self::map_send_error(e, timeout))?;

        Self::check_status(response).await
    }

    async fn check_status(response: reqwest::Response) -> RpcResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<RpcReply>(&body)
            .ok()
            .and_then(|reply| reply.message)
            .unwrap_or(body);

        Err(RpcError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn is_alive(&self, address: &str) -> RpcResult<()> {
        let timeout = self.config.probe_timeout;
        let request = self
            .http_client
            .post(Self::url(address, paths::IS_ALIVE))
            .timeout(timeout);

        self.send(request, timeout).await?;
        debug!("节点 {} 存活", address);
        Ok(())
    }

    async fn start_job(&self, address: &str, request: &StartJobRequest) -> RpcResult<ChunkStream> {
        let builder = self
            .http_client
            .post(Self::url(address, paths::START_JOB))
            .json(request);

        let response = self.send(builder, self.config.call_timeout).await?;
        debug!("节点 {} 已启动任务 {}", address, request.job_name);
        Ok(decode_chunk_stream(
            response.bytes_stream(),
            self.config.max_frame,
        ))
    }

    async fn push_config(&self, address: &str, config: Bytes) -> RpcResult<bool> {
        let timeout = self.config.call_timeout;
        let body = encode_chunks(&config, self.config.chunk_size);
        let builder = self
            .http_client
            .post(Self::url(address, paths::PUSH_CONFIG))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .timeout(timeout);

        let response = self.send(builder, timeout).await?;
        let reply: RpcReply = response
            .json()
            .await
            .map_err(|e| RpcError::protocol(format!("无法解析节点应答: {e}")))?;
        Ok(reply.success)
    }

    async fn pull_config(&self, address: &str, chunk_size_kb: u32) -> RpcResult<ChunkStream> {
        let builder = self
            .http_client
            .post(Self::url(address, paths::PULL_CONFIG))
            .json(&PullConfigRequest { chunk_size_kb });

        let response = self.send(builder, self.config.call_timeout).await?;
        let max_frame = self.config.max_frame.max(chunk_size_kb as usize * 1024);
        Ok(decode_chunk_stream(response.bytes_stream(), max_frame))
    }
}
