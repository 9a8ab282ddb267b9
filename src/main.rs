use clap::{Arg, Command};
use tcp_balancer::{config::Settings, monitoring::setup_logging, proxy::ProxyServer};
use tracing::{debug, info};

// 版本信息常量
const VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_TIME: &str = env!("BUILD_TIME");
const GIT_HASH: &str = env!("GIT_HASH");
const RUST_VERSION: &str = env!("RUST_VERSION");

fn get_version_info() -> String {
    format!(
        "TCP Balancer v{}\n\
        Build Information:\n\
        ├─ Build Time: {}\n\
        ├─ Git Hash: {}\n\
        └─ Rust Version: {}",
        VERSION, BUILD_TIME, GIT_HASH, RUST_VERSION
    )
}

fn build_cli() -> Command {
    Command::new("tcp-balancer")
        .version(VERSION)
        .about("A layer-4 TCP load balancer with round-robin selection and active health checks")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Specify configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Override the listen port from the configuration file")
                .value_parser(clap::value_parser!(u16).range(1..)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Set log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("version-info")
                .long("version-info")
                .help("Show detailed version and build information")
                .action(clap::ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = build_cli().get_matches();

    if matches.get_flag("version-info") {
        println!("{}", get_version_info());
        return Ok(());
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");
    let mut settings = Settings::load_from_path(config_path).await?;

    if let Some(port) = matches.get_one::<u16>("port") {
        settings.server.listen_port = *port;
    }

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| settings.monitoring.log_level.clone());
    setup_logging(&log_level)?;

    info!("Starting TCP Balancer v{} ({})", VERSION, GIT_HASH);
    info!("Configuration loaded from {}", config_path);
    info!("  Listen: {}", settings.server.bind_address());
    info!("  Health check interval: {}ms", settings.health_check.interval_ms);
    info!("  Backends: {}", settings.backends.len());

    let server = ProxyServer::new(settings)?;
    server.shutdown().listen_for_signals();

    // 阻塞直到收到关机信号
    server.run().await?;

    if let Ok(output) = server.metrics().export_metrics() {
        debug!("Final metrics:\n{}", output);
    }

    info!("TCP Balancer shutdown complete");
    Ok(())
}
