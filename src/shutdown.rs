use std::fmt;
use tokio::sync::broadcast;
use tracing::{error, info};

/// 关机信号类型
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShutdownSignal {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// 程序内部触发的关机
    Internal,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// 关机信号广播器
///
/// 监听循环和健康检查各持有一个接收端，收到信号后退出循环。
/// 正在转发的连接不做排空，随进程结束。
#[derive(Debug, Clone)]
pub struct Shutdown {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self { shutdown_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// 触发关机，没有订阅者时静默忽略
    pub fn trigger(&self, signal: ShutdownSignal) {
        info!("Initiating shutdown due to signal: {}", signal);
        let _ = self.shutdown_tx.send(signal);
    }

    /// 注册 SIGINT / SIGTERM 监听
    pub fn listen_for_signals(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for SIGINT: {}", e);
                return;
            }
            shutdown.trigger(ShutdownSignal::Interrupt);
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let shutdown = self.clone();
            tokio::spawn(async move {
                let mut sigterm = match signal(SignalKind::terminate()) {
                    Ok(signal) => signal,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };

                if sigterm.recv().await.is_some() {
                    shutdown.trigger(ShutdownSignal::Terminate);
                }
            });
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
