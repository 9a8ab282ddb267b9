pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod monitoring;
pub mod pool;
pub mod proxy;
pub mod shutdown;

pub use config::Settings;
pub use error::{ProxyError, ProxyResult};
pub use health::{HealthChecker, Probe, TcpProbe};
pub use metrics::BalancerMetrics;
pub use pool::{BackendPool, BackendTarget};
pub use proxy::{ConnectionForwarder, Dispatcher, ProxyServer};
pub use shutdown::{Shutdown, ShutdownSignal};
