use crate::error::{ProxyError, ProxyResult};
use crate::metrics::BalancerMetrics;
use crate::pool::{BackendPool, BackendTarget};
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// 探测接口 - 判断单个后端是否可达
#[async_trait]
pub trait Probe: Send + Sync {
    /// 成功时返回响应时间
    async fn probe(&self, target: &BackendTarget) -> ProxyResult<Duration>;
}

/// TCP 探测：只建立连接，不发送任何数据，连接随即关闭
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, target: &BackendTarget) -> ProxyResult<Duration> {
        let start_time = Instant::now();

        match timeout(self.timeout, TcpStream::connect(target.address())).await {
            Ok(Ok(_stream)) => Ok(start_time.elapsed()),
            Ok(Err(e)) => Err(ProxyError::ProbeFailed {
                backend: target.name().to_string(),
                reason: format!("connection failed: {}", e),
            }),
            Err(_) => Err(ProxyError::ProbeFailed {
                backend: target.name().to_string(),
                reason: format!("connection timeout after {:?}", self.timeout),
            }),
        }
    }
}

/// 健康检查器 - 周期性探测池中所有后端并更新在线状态
pub struct HealthChecker {
    pool: Arc<BackendPool>,
    interval: Duration,
    probe: Arc<dyn Probe>,
    metrics: BalancerMetrics,
}

/// 单次检查的结果
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub results: Vec<(String, bool)>,
}

impl HealthReport {
    pub fn online_count(&self) -> usize {
        self.results.iter().filter(|(_, online)| *online).count()
    }

    pub fn offline_count(&self) -> usize {
        self.results.len() - self.online_count()
    }

    pub fn is_online(&self, backend: &str) -> Option<bool> {
        self.results
            .iter()
            .find(|(name, _)| name == backend)
            .map(|(_, online)| *online)
    }
}

impl HealthChecker {
    pub fn new(
        pool: Arc<BackendPool>,
        interval: Duration,
        probe: Arc<dyn Probe>,
        metrics: BalancerMetrics,
    ) -> Self {
        Self {
            pool,
            interval,
            probe,
            metrics,
        }
    }

    /// 在后台任务中运行
    pub fn start(self, shutdown: broadcast::Receiver<ShutdownSignal>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// 立即检查一次，之后每次检查结束再等待一个间隔，直到收到关机信号
    pub async fn run(&self, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        info!(
            "Starting health checker for {} backends with interval: {:?}",
            self.pool.len(),
            self.interval
        );

        loop {
            let report = self.check_all().await;
            debug!(
                online = report.online_count(),
                offline = report.offline_count(),
                "Health check completed"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!("Health checker stopped");
    }

    /// 执行一轮检查：并发探测所有后端，每个后端只写一次在线状态
    pub async fn check_all(&self) -> HealthReport {
        let check_tasks: Vec<_> = self
            .pool
            .targets()
            .iter()
            .map(|target| {
                let target = target.clone();
                let probe = self.probe.clone();
                tokio::spawn(async move { probe.probe(&target).await })
            })
            .collect();

        let mut report = HealthReport::default();
        for (target, task) in self.pool.targets().iter().zip(check_tasks) {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Health check task failed: {}", e);
                    Err(ProxyError::ProbeFailed {
                        backend: target.name().to_string(),
                        reason: e.to_string(),
                    })
                }
            };

            let online = self.apply(target, result);
            report.results.push((target.name().to_string(), online));
        }

        report
    }

    fn apply(&self, target: &BackendTarget, result: ProxyResult<Duration>) -> bool {
        let online = result.is_ok();
        let was_online = target.set_online(online);
        self.metrics.record_probe(target.name(), online);

        match (&result, was_online) {
            (Ok(response_time), false) => info!(
                backend = %target.name(),
                response_time = ?response_time,
                "Backend is back online"
            ),
            (Err(e), true) => warn!(backend = %target.name(), error = %e, "Backend marked offline"),
            (Ok(response_time), true) => debug!(
                backend = %target.name(),
                response_time = ?response_time,
                "Health probe succeeded"
            ),
            (Err(e), false) => debug!(backend = %target.name(), error = %e, "Backend still offline"),
        }

        online
    }
}
