//! wxbackup - captures articles and publisher profiles through a local
//! interception proxy.
//!
//! Point the client at the proxy, install the root CA it prints, then open a
//! publisher's history page. Captured records land in a SQLite database.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use directories::ProjectDirs;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wxbackup_proxy::{
    CaManager, InterceptHosts, PipelineConfig, ProxyConfig, ProxyServer, ScriptConfig,
};
use wxbackup_storage::Database;

const HOUR: u64 = 3600;

/// Upper bound for the hour-valued options, ten years.
const MAX_HOURS: u64 = 24 * 365 * 10;

/// wxbackup - capture articles through a local interception proxy
#[derive(Parser, Debug)]
#[command(name = "wxbackup", version, about)]
struct Args {
    /// Address the proxy listens on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Hosts to intercept, comma separated (defaults to mp.weixin.qq.com)
    #[arg(long = "hosts", value_delimiter = ',')]
    hosts: Vec<String>,

    /// SQLite database path (defaults to the data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Directory holding the root CA (defaults to the data directory)
    #[arg(long)]
    ca_dir: Option<PathBuf>,

    /// Number of persistence workers
    #[arg(long, default_value_t = 10)]
    workers: usize,

    /// Ingest queue capacity
    #[arg(long, default_value_t = 100)]
    queue_capacity: usize,

    /// Seconds an injected page waits before moving on
    #[arg(long, default_value_t = 8)]
    jump_interval: u64,

    /// Hours of history scrolled on known publishers
    #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(u64).range(0..=MAX_HOURS))]
    history_hours: u64,

    /// Hours before a visited publisher is offered again
    #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(u64).range(0..=MAX_HOURS))]
    revisit_hours: u64,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log to the console only
    #[arg(long)]
    no_file_log: bool,
}

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "wxbackup", "wxbackup").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging with file rotation.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wxbackup={},warn", log_level)));

    if !args.no_file_log {
        if let Some(log_dir) = logs_dir() {
            if std::fs::create_dir_all(&log_dir).is_ok() {
                let file_appender = RollingFileAppender::builder()
                    .rotation(Rotation::DAILY)
                    .max_log_files(5)
                    .filename_prefix("wxbackup")
                    .filename_suffix("log")
                    .build(&log_dir)
                    .ok();

                if let Some(appender) = file_appender {
                    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().with_writer(std::io::stdout))
                        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                        .init();

                    tracing::info!("Logging to {:?}", log_dir);
                    return Some(guard);
                }
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if !args.no_file_log {
        tracing::warn!("File logging unavailable, using console only");
    }
    None
}

/// Maps command-line arguments onto the proxy configuration.
fn proxy_config(args: &Args) -> anyhow::Result<ProxyConfig> {
    let ca_manager = match &args.ca_dir {
        Some(dir) => CaManager::new(dir),
        None => CaManager::with_default_dir().context("Failed to locate CA directory")?,
    };

    let scripts = ScriptConfig::default()
        .with_jump_interval(Duration::from_secs(args.jump_interval))
        .with_history_window(Duration::from_secs(args.history_hours * HOUR));

    let pipeline = PipelineConfig::default()
        .with_workers(args.workers)
        .with_capacity(args.queue_capacity)
        .normalized();

    let mut config = ProxyConfig::with_ca_manager_defaults(ca_manager)
        .with_addr(args.listen)
        .with_scripts(scripts)
        .with_pipeline(pipeline)
        .with_revisit_interval(Duration::from_secs(args.revisit_hours * HOUR));

    if !args.hosts.is_empty() {
        let hosts = InterceptHosts::new(&args.hosts);
        if hosts.hosts().is_empty() {
            anyhow::bail!("--hosts names no usable host");
        }
        config = config.with_hosts(hosts);
    }
    Ok(config)
}

fn open_database(args: &Args) -> anyhow::Result<Database> {
    let db = match &args.db {
        Some(path) => Database::with_path(path),
        None => Database::new(),
    };
    db.context("Failed to open database")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args);

    tracing::info!("Starting wxbackup v{}", env!("CARGO_PKG_VERSION"));

    let db = open_database(&args)?;
    let config = proxy_config(&args)?;

    let server = ProxyServer::new(config, db.clone()).context("Failed to create proxy")?;
    let pipeline = server.pipeline();
    tracing::info!(
        "Install the CA certificate on the client: {:?}",
        server.ca_cert_path()
    );

    let handle = server.start().context("Failed to start proxy")?;
    tracing::info!("Proxy listening on {}", handle.addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    handle.stop().await;
    pipeline.shutdown().await;
    db.close().context("Failed to close database")?;

    tracing::info!("wxbackup stopped");
    Ok(())
}
