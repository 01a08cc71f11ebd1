use std::time::Duration;

use logman_core::{
    rpc::{paths, RegisterRequest, RegisterResponse, ReportErrorRequest, RpcReply, NODE_ID_HEADER},
    transfer::{encode_chunks, CHUNK_SIZE},
    RpcError, SchedulerError, SchedulerResult,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 节点调用控制器的客户端
pub struct ControllerClient {
    controller_url: String,
    http_client: reqwest::Client,
    timeout: Duration,
    chunk_size: usize,
}

impl ControllerClient {
    pub fn new(controller_url: impl Into<String>) -> SchedulerResult<Self> {
        Self::with_timeout(controller_url, Duration::from_secs(30))
    }

    pub fn with_timeout(
        controller_url: impl Into<String>,
        timeout: Duration,
    ) -> SchedulerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Internal(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            controller_url: controller_url.into().trim_end_matches('/').to_string(),
            http_client,
            timeout,
            chunk_size: CHUNK_SIZE,
        })
    }

    pub fn controller_url(&self) -> &str {
        &self.controller_url
    }

    /// 以本机主机名构造注册请求
    pub fn local_registration(ip: &str, port: u16, uuid: Option<Uuid>) -> RegisterRequest {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());

        RegisterRequest {
            hostname,
            ip: ip.to_string(),
            port,
            uuid,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.controller_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> SchedulerResult<reqwest::Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RpcError::Timeout(self.timeout)
            } else {
                RpcError::transport(e.to_string())
            }
        })?;

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
        }
        .into())
    }

    async fn read_reply(response: reqwest::Response) -> SchedulerResult<RpcReply> {
        response
            .json::<RpcReply>()
            .await
            .map_err(|e| RpcError::protocol(format!("无法解析控制器应答: {e}")).into())
    }

    pub async fn register(&self, request: &RegisterRequest) -> SchedulerResult<Uuid> {
        let response = self
            .send(self.http_client.post(self.url(paths::REGISTER)).json(request))
            .await?;
        let reply: RegisterResponse = response
            .json()
            .await
            .map_err(|e| RpcError::protocol(format!("无法解析注册应答: {e}")))?;

        match reply.uuid {
            Some(uuid) if reply.success => {
                info!("已注册到控制器 {}, 节点ID {}", self.controller_url, uuid);
                Ok(uuid)
            }
            _ => Err(SchedulerError::Rpc(RpcError::Rejected {
                status: 200,
                message: "控制器拒绝了注册".to_string(),
            })),
        }
    }

    /// 注册失败时按固定间隔重试，最多尝试 `attempts` 次
    pub async fn register_with_retry(
        &self,
        request: &RegisterRequest,
        attempts: u32,
        backoff: Duration,
    ) -> SchedulerResult<Uuid> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.register(request).await {
                Ok(uuid) => return Ok(uuid),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    warn!(
                        "注册失败 (第 {}/{} 次): {}, {:?} 后重试",
                        attempt, attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 上传结果文件
    pub async fn submit_result(&self, node_id: Uuid, data: &[u8]) -> SchedulerResult<RpcReply> {
        let body = encode_chunks(data, self.chunk_size);
        let request = self
            .http_client
            .post(self.url(paths::SUBMIT_RESULT))
            .header(NODE_ID_HEADER, node_id.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);

        let reply = Self::read_reply(self.send(request).await?).await?;
        debug!("结果已上传 ({} 字节)", data.len());
        Ok(reply)
    }

    pub async fn report_error(&self, node_id: Uuid, message: &str) -> SchedulerResult<()> {
        let request = self
            .http_client
            .post(self.url(paths::REPORT_ERROR))
            .header(NODE_ID_HEADER, node_id.to_string())
            .json(&ReportErrorRequest {
                message: message.to_string(),
            });

        Self::read_reply(self.send(request).await?).await?;
        warn!("已向控制器报告错误: {}", message);
        Ok(())
    }
}
