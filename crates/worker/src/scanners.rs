use std::time::{Duration, Instant};

use async_trait::async_trait;
use recon_core::{ScanContext, ScanError, ScanWorker, TaskType};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, info};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

/// 端口扫描参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortScanParams {
    pub host: String,
    pub ports: Vec<u16>,
    /// 单个端口的连接超时（毫秒）
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

/// TCP connect 端口扫描
///
/// 对每个端口发起一次完整的 TCP 连接，连接成功即视为开放。
#[derive(Debug, Clone, Default)]
pub struct TcpPortScanner;

impl TcpPortScanner {
    pub fn new() -> Self {
        Self
    }

    async fn probe(host: String, port: u16, timeout: Duration) -> (u16, bool) {
        let open = matches!(
            tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await,
            Ok(Ok(_))
        );
        (port, open)
    }
}

#[async_trait]
impl ScanWorker for TcpPortScanner {
    fn task_type(&self) -> TaskType {
        TaskType::PortScan
    }

    fn name(&self) -> &str {
        "tcp-connect"
    }

    async fn execute(&self, ctx: &ScanContext) -> Result<serde_json::Value, ScanError> {
        let params: PortScanParams = serde_json::from_value(ctx.payload.clone())
            .map_err(|e| ScanError::InvalidPayload(format!("解析端口扫描参数失败: {e}")))?;
        if params.host.trim().is_empty() {
            return Err(ScanError::InvalidPayload("目标主机不能为空".to_string()));
        }
        if params.ports.is_empty() {
            return Err(ScanError::InvalidPayload("端口列表不能为空".to_string()));
        }

        let timeout = Duration::from_millis(
            params
                .connect_timeout_ms
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        );
        info!(
            "执行端口扫描: task_id={}, host={}, ports={}",
            ctx.task_id,
            params.host,
            params.ports.len()
        );

        let start_time = Instant::now();
        let mut probes = JoinSet::new();
        for port in &params.ports {
            probes.spawn(Self::probe(params.host.clone(), *port, timeout));
        }

        let mut open_ports = Vec::new();
        while let Some(result) = probes.join_next().await {
            let (port, open) =
                result.map_err(|e| ScanError::Execution(format!("端口探测任务异常: {e}")))?;
            if open {
                debug!("{}:{} 开放", params.host, port);
                open_ports.push(port);
            }
        }
        open_ports.sort_unstable();

        Ok(serde_json::json!({
            "host": params.host,
            "scanned": params.ports.len(),
            "open_ports": open_ports,
            "duration_ms": start_time.elapsed().as_millis() as u64,
        }))
    }
}
