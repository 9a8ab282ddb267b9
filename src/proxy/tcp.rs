use super::{ConnectionForwarder, ConnectionInfo, ConnectionState};
use crate::error::{ProxyError, ProxyResult};
use crate::metrics::BalancerMetrics;
use crate::pool::{BackendPool, BackendTarget};
use crate::shutdown::ShutdownSignal;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// 监听循环 - 接收客户端，选择后端，为每个连接启动独立的转发任务
pub struct Dispatcher {
    listener: TcpListener,
    pool: Arc<BackendPool>,
    forwarder: ConnectionForwarder,
    connect_timeout: Duration,
    metrics: BalancerMetrics,
}

impl Dispatcher {
    pub async fn bind(
        addr: &str,
        pool: Arc<BackendPool>,
        forwarder: ConnectionForwarder,
        connect_timeout: Duration,
        metrics: BalancerMetrics,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind TCP listener to {}", addr))?;

        info!("Load balancer listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            pool,
            forwarder,
            connect_timeout,
            metrics,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 运行监听循环，直到收到关机信号
    pub async fn run(self, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, client_addr)) => self.dispatch(stream, client_addr),
                        Err(e) => {
                            error!("Failed to accept TCP connection: {}", e);
                            // 短暂延迟以避免忙循环
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Dispatcher received shutdown signal");
                    break;
                }
            }
        }

        info!("Dispatcher stopped accepting connections");
    }

    /// 为新连接选择后端；选择失败时立即关闭客户端
    fn dispatch(&self, client: TcpStream, client_addr: SocketAddr) {
        let mut info = ConnectionInfo::new(client_addr);
        self.metrics.record_accepted();
        info!(connection = %info.id, client = %client_addr, "Connection accepted");

        let target = match self.pool.select() {
            Ok(target) => target,
            Err(e) => {
                self.metrics.record_no_backend();
                warn!(
                    connection = %info.id,
                    client = %client_addr,
                    error = %e,
                    "No backend available, closing client"
                );
                info.transition(ConnectionState::Closed);
                drop(client);
                return;
            }
        };

        info.backend = Some(target.name().to_string());
        info.transition(ConnectionState::BackendSelected);
        self.metrics.record_selected(target.name());
        info!(
            connection = %info.id,
            client = %client_addr,
            backend = %target.name(),
            "Backend selected"
        );

        let forwarder = self.forwarder;
        let connect_timeout = self.connect_timeout;
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            handle_connection(client, target, info, forwarder, connect_timeout, metrics).await;
        });
    }
}

async fn handle_connection(
    client: TcpStream,
    target: Arc<BackendTarget>,
    mut info: ConnectionInfo,
    forwarder: ConnectionForwarder,
    connect_timeout: Duration,
    metrics: BalancerMetrics,
) {
    // 连接失败不修改在线状态，由健康检查器负责
    let backend = match connect_backend(&target, connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            metrics.record_unreachable(target.name());
            warn!(
                connection = %info.id,
                client = %info.client_addr,
                backend = %target.name(),
                error = %e,
                "Backend unreachable, closing client"
            );
            info.transition(ConnectionState::Closed);
            return;
        }
    };
    info.transition(ConnectionState::BackendConnected);

    for stream in [&client, &backend] {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(connection = %info.id, "Failed to set TCP_NODELAY: {}", e);
        }
    }

    info.transition(ConnectionState::Relaying);
    metrics.record_relay_started();

    let summary = forwarder.forward(client, backend).await;

    info.bytes_to_backend = summary.client_to_backend;
    info.bytes_to_client = summary.backend_to_client;
    info.transition(ConnectionState::Closed);
    metrics.record_relay_closed(
        summary.is_success(),
        summary.client_to_backend,
        summary.backend_to_client,
    );

    match &summary.error {
        None => info!(
            connection = %info.id,
            backend = %target.name(),
            bytes_to_backend = info.bytes_to_backend,
            bytes_to_client = info.bytes_to_client,
            duration = ?info.duration(),
            "Relay closed"
        ),
        Some(e) => warn!(
            connection = %info.id,
            backend = %target.name(),
            bytes_to_backend = info.bytes_to_backend,
            bytes_to_client = info.bytes_to_client,
            error = %e,
            "Relay closed with error"
        ),
    }
}

/// 连接后端，超时视为连接失败
pub async fn connect_backend(
    target: &BackendTarget,
    connect_timeout: Duration,
) -> ProxyResult<TcpStream> {
    match timeout(connect_timeout, TcpStream::connect(target.address())).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ProxyError::BackendConnect {
            backend: target.name().to_string(),
            source,
        }),
        Err(_) => Err(ProxyError::BackendConnectTimeout {
            backend: target.name().to_string(),
            timeout_ms: connect_timeout.as_millis() as u64,
        }),
    }
}
