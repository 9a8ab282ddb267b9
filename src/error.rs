use std::io;

use crate::proxy::RelayDirection;

/// 负载均衡错误类型
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No backend available after examining {examined} targets")]
    NoBackendAvailable { examined: usize },

    #[error("Backend {backend} connection failed: {source}")]
    BackendConnect {
        backend: String,
        #[source]
        source: io::Error,
    },

    #[error("Backend {backend} connection timed out after {timeout_ms}ms")]
    BackendConnectTimeout { backend: String, timeout_ms: u64 },

    #[error("Relay I/O failure ({direction}): {source}")]
    RelayIo {
        direction: RelayDirection,
        #[source]
        source: io::Error,
    },

    #[error("Health probe for {backend} failed: {reason}")]
    ProbeFailed { backend: String, reason: String },

    #[error("Backend pool cannot be empty")]
    EmptyPool,

    #[error("Invalid backend address: {0}")]
    InvalidBackendAddress(String),
}

impl ProxyError {
    /// 是否只影响单个连接或单次探测（不终止监听循环和健康检查）
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ProxyError::EmptyPool | ProxyError::InvalidBackendAddress(_)
        )
    }
}

/// 代理结果
pub type ProxyResult<T> = Result<T, ProxyError>;
