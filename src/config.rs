mod settings;

pub use settings::{HealthCheckConfig, MonitoringConfig, ServerConfig, Settings};

use crate::error::{ProxyError, ProxyResult};
use serde::{Deserialize, Serialize};

/// 后端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// 显示名称，缺省为地址本身
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `host:port`
    pub address: String,
    /// 初始在线状态，缺省为在线
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
}

impl BackendConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
            online: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = Some(online);
        self
    }

    /// 解析 `host:port`，IPv6 地址需使用 `[addr]:port` 形式
    pub fn host_port(&self) -> ProxyResult<(String, u16)> {
        parse_host_port(&self.address)
    }
}

pub fn parse_host_port(address: &str) -> ProxyResult<(String, u16)> {
    let invalid = || ProxyError::InvalidBackendAddress(address.to_string());

    let (host, port) = address.trim().rsplit_once(':').ok_or_else(invalid)?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if host.is_empty() || (host.contains(':') && !address.contains('[')) {
        return Err(invalid());
    }

    let port: u16 = port.parse().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }

    Ok((host.to_string(), port))
}
