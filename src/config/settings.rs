use super::BackendConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// 顺序即轮询顺序
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_host: String,
    pub listen_port: u16,
    pub buffer_size: usize,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            listen_port: 49152,
            buffer_size: 4096,
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            timeout_ms: 1000,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            health_check: HealthCheckConfig::default(),
            monitoring: MonitoringConfig::default(),
            backends: vec![
                BackendConfig::new("127.0.0.1:9001").with_name("service_1"),
                BackendConfig::new("127.0.0.1:9002").with_name("service_2"),
                BackendConfig::new("127.0.0.1:9003").with_name("service_3"),
            ],
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        if self.bind_host.contains(':') {
            format!("[{}]:{}", self.bind_host, self.listen_port)
        } else {
            format!("{}:{}", self.bind_host, self.listen_port)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Settings {
    pub async fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let settings = if config_path.exists() {
            let content = tokio::fs::read_to_string(config_path)
                .await
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?
        } else {
            // 使用默认配置并保存到文件
            let settings = Settings::default();
            settings.save_to_path(config_path).await?;
            settings
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub async fn save_to_path<P: AsRef<Path>>(&self, config_path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(config_path.as_ref(), content)
            .await
            .with_context(|| format!("Failed to write config file: {:?}", config_path.as_ref()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.listen_port == 0 {
            return Err(anyhow::anyhow!("Listen port cannot be 0"));
        }
        if self.server.buffer_size == 0 {
            return Err(anyhow::anyhow!("Relay buffer size cannot be 0"));
        }
        if self.server.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Backend connect timeout cannot be 0"));
        }
        if self.health_check.interval_ms == 0 {
            return Err(anyhow::anyhow!("Health check interval cannot be 0"));
        }
        if self.health_check.timeout_ms == 0 {
            return Err(anyhow::anyhow!("Health check timeout cannot be 0"));
        }
        if self.backends.is_empty() {
            return Err(anyhow::anyhow!("At least one backend must be configured"));
        }
        for backend in &self.backends {
            backend
                .host_port()
                .with_context(|| format!("Backend '{}' is misconfigured", backend.address))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.server.bind_address(), "0.0.0.0:49152");
        assert_eq!(settings.backends.len(), 3);
    }

    #[test]
    fn test_parse_partial_toml() {
        let settings = Settings::from_toml(
            r#"
            [server]
            listen_port = 7000

            [health_check]
            interval_ms = 250

            [[backends]]
            address = "10.0.0.1:80"

            [[backends]]
            name = "standby"
            address = "10.0.0.2:80"
            online = false
            "#,
        )
        .unwrap();

        settings.validate().unwrap();
        assert_eq!(settings.server.listen_port, 7000);
        assert_eq!(settings.server.buffer_size, 4096);
        assert_eq!(settings.health_check.interval(), Duration::from_millis(250));
        assert_eq!(settings.health_check.timeout_ms, 1000);
        assert_eq!(settings.backends[0].online, None);
        assert_eq!(settings.backends[1].name.as_deref(), Some("standby"));
        assert_eq!(settings.backends[1].online, Some(false));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut settings = Settings::default();
        settings.backends.clear();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.backends.push(BackendConfig::new("no-port"));
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.health_check.interval_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_ipv6_bind_address() {
        let server = ServerConfig {
            bind_host: "::".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(server.bind_address(), "[::]:49152");
    }

    #[tokio::test]
    async fn test_missing_file_writes_defaults() {
        let path = std::env::temp_dir().join(format!("tcp-balancer-{}.toml", uuid::Uuid::new_v4()));

        let settings = Settings::load_from_path(&path).await.unwrap();
        assert!(path.exists());

        let reloaded = Settings::load_from_path(&path).await.unwrap();
        assert_eq!(reloaded.backends, settings.backends);
        assert_eq!(reloaded.server.listen_port, settings.server.listen_port);

        let _ = std::fs::remove_file(&path);
    }
}
