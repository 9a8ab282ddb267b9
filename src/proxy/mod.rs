pub mod forwarder;
pub mod tcp;

use crate::config::Settings;
use crate::health::{HealthChecker, TcpProbe};
use crate::metrics::BalancerMetrics;
use crate::pool::BackendPool;
use crate::shutdown::Shutdown;
use anyhow::{Context, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use forwarder::{ConnectionForwarder, RelaySummary};
pub use tcp::Dispatcher;

/// 代理服务器 - 组装后端池、健康检查器和监听循环
#[derive(Clone)]
pub struct ProxyServer {
    settings: Settings,
    pool: Arc<BackendPool>,
    metrics: BalancerMetrics,
    shutdown: Shutdown,
}

impl ProxyServer {
    pub fn new(settings: Settings) -> Result<Self> {
        let pool = BackendPool::from_configs(&settings.backends)
            .context("Failed to build backend pool")?;
        let metrics = BalancerMetrics::new().context("Failed to register metrics")?;

        Ok(Self {
            settings,
            pool: Arc::new(pool),
            metrics,
            shutdown: Shutdown::new(),
        })
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &BalancerMetrics {
        &self.metrics
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// 绑定配置中的监听地址并运行，直到收到关机信号
    pub async fn run(&self) -> Result<()> {
        let dispatcher = self.bind_to(&self.settings.server.bind_address()).await?;
        self.serve(dispatcher).await;
        Ok(())
    }

    pub async fn bind_to(&self, addr: &str) -> Result<Dispatcher> {
        Dispatcher::bind(
            addr,
            self.pool.clone(),
            ConnectionForwarder::new(self.settings.server.buffer_size),
            self.settings.server.connect_timeout(),
            self.metrics.clone(),
        )
        .await
    }

    /// 启动健康检查并运行监听循环
    pub async fn serve(&self, dispatcher: Dispatcher) {
        for target in self.pool.targets() {
            info!("  Backend: {}", target);
        }

        let probe = Arc::new(TcpProbe::new(self.settings.health_check.timeout()));
        let health_checker = HealthChecker::new(
            self.pool.clone(),
            self.settings.health_check.interval(),
            probe,
            self.metrics.clone(),
        );
        let health_handle = health_checker.start(self.shutdown.subscribe());

        dispatcher.run(self.shutdown.subscribe()).await;

        if let Err(e) = health_handle.await {
            warn!("Health checker task ended abnormally: {}", e);
        }
        info!("Proxy server stopped");
    }
}

/// 转发方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDirection {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for RelayDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayDirection::ClientToBackend => write!(f, "client->backend"),
            RelayDirection::BackendToClient => write!(f, "backend->client"),
        }
    }
}

/// 单个连接的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    BackendSelected,
    BackendConnected,
    Relaying,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Accepted => write!(f, "accepted"),
            ConnectionState::BackendSelected => write!(f, "backend_selected"),
            ConnectionState::BackendConnected => write!(f, "backend_connected"),
            ConnectionState::Relaying => write!(f, "relaying"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// 连接信息
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub client_addr: SocketAddr,
    pub backend: Option<String>,
    pub state: ConnectionState,
    pub start_time: Instant,
    pub bytes_to_backend: u64,
    pub bytes_to_client: u64,
}

impl ConnectionInfo {
    pub fn new(client_addr: SocketAddr) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_addr,
            backend: None,
            state: ConnectionState::Accepted,
            start_time: Instant::now(),
            bytes_to_backend: 0,
            bytes_to_client: 0,
        }
    }

    pub fn transition(&mut self, next: ConnectionState) {
        debug!(
            connection = %self.id,
            from = %self.state,
            to = %next,
            "Connection state changed"
        );
        self.state = next;
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_to_backend + self.bytes_to_client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_info_lifecycle() {
        let mut info = ConnectionInfo::new("127.0.0.1:50000".parse().unwrap());
        assert_eq!(info.state, ConnectionState::Accepted);
        assert!(info.backend.is_none());

        info.backend = Some("service_1".to_string());
        info.transition(ConnectionState::BackendSelected);
        info.transition(ConnectionState::Closed);
        info.bytes_to_backend = 5;
        info.bytes_to_client = 7;

        assert_eq!(info.state, ConnectionState::Closed);
        assert_eq!(info.total_bytes(), 12);
        assert!(info.duration().as_secs() < 5);
    }

    #[test]
    fn test_display() {
        assert_eq!(RelayDirection::ClientToBackend.to_string(), "client->backend");
        assert_eq!(ConnectionState::BackendConnected.to_string(), "backend_connected");
    }

    #[test]
    fn test_empty_backend_list_is_fatal() {
        let mut settings = Settings::default();
        settings.backends.clear();
        assert!(ProxyServer::new(settings).is_err());
    }
}
