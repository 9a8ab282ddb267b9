use crate::config::BackendConfig;
use crate::error::ProxyResult;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// 后端目标 - 地址固定，在线状态由健康检查器原子更新
#[derive(Debug)]
pub struct BackendTarget {
    name: String,
    host: String,
    port: u16,
    online: AtomicBool,
}

impl BackendTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let name = format_address(&host, port);
        Self {
            name,
            host,
            port,
            online: AtomicBool::new(true),
        }
    }

    pub fn from_config(config: &BackendConfig) -> ProxyResult<Self> {
        let (host, port) = config.host_port()?;
        let mut target = Self::new(host, port).with_online(config.online.unwrap_or(true));
        if let Some(name) = &config.name {
            target.name = name.clone();
        }
        Ok(target)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_online(self, online: bool) -> Self {
        self.online.store(online, Ordering::Relaxed);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`，可直接用于连接
    pub fn address(&self) -> String {
        format_address(&self.host, self.port)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// 写入在线状态，返回写入前的值
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::AcqRel)
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) [{}]",
            self.name,
            self.address(),
            if self.is_online() { "online" } else { "offline" }
        )
    }
}

fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
