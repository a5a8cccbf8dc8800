//! MITM proxy server.
//!
//! Wires the certificate authority, the default content rules and the
//! ingestion pipeline into a hudsucker proxy.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::Proxy;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use wxbackup_storage::Database;

use crate::authority::CachingAuthority;
use crate::ca::CaManager;
use crate::domains::InterceptHosts;
use crate::error::{ProxyError, Result};
use crate::handler::ProxyHandler;
use crate::pipeline::{IngestPipeline, PipelineConfig};
use crate::rules::{RuleContext, RuleEngine, ScriptConfig, DEFAULT_REVISIT_INTERVAL};
use crate::DEFAULT_PROXY_PORT;

/// Default time open connections get to finish at shutdown.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// The CA manager for certificate generation.
    pub ca_manager: CaManager,
    /// Hosts whose traffic is decrypted.
    pub hosts: InterceptHosts,
    /// Injected script settings.
    pub scripts: ScriptConfig,
    /// Ingestion pipeline sizing.
    pub pipeline: PipelineConfig,
    /// How long a visited profile waits before it is offered again.
    pub revisit_interval: Duration,
    /// How long open connections get to finish at shutdown.
    pub grace_period: Duration,
}

impl ProxyConfig {
    /// Creates a configuration with default settings around `ca_manager`.
    pub fn with_ca_manager_defaults(ca_manager: CaManager) -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PROXY_PORT)),
            ca_manager,
            hosts: InterceptHosts::default(),
            scripts: ScriptConfig::default(),
            pipeline: PipelineConfig::default(),
            revisit_interval: DEFAULT_REVISIT_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port (uses 127.0.0.1 as host).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], port));
        self
    }

    /// Sets the intercepted hosts.
    pub fn with_hosts(mut self, hosts: InterceptHosts) -> Self {
        self.hosts = hosts;
        self
    }

    /// Sets the script settings.
    pub fn with_scripts(mut self, scripts: ScriptConfig) -> Self {
        self.scripts = scripts;
        self
    }

    /// Sets the pipeline sizing.
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Sets the revisit interval.
    pub fn with_revisit_interval(mut self, interval: Duration) -> Self {
        self.revisit_interval = interval;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }
}

/// MITM proxy server capturing platform content.
pub struct ProxyServer {
    config: ProxyConfig,
    pipeline: Arc<IngestPipeline>,
    engine: Arc<RuleEngine>,
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl ProxyServer {
    /// Creates a proxy server persisting into `db`.
    ///
    /// Generates the CA on first run. Must be called inside a tokio runtime;
    /// pipeline workers run on its blocking pool.
    pub fn new(config: ProxyConfig, db: Database) -> Result<Self> {
        config.ca_manager.ensure_ca().map_err(ProxyError::Ca)?;

        let runtime = Handle::try_current().map_err(|e| ProxyError::Server(e.to_string()))?;
        let pipeline = Arc::new(IngestPipeline::new(
            Arc::new(db.clone()),
            config.pipeline,
            runtime,
        ));

        let ctx = RuleContext::new(db, Arc::clone(&pipeline))
            .with_scripts(config.scripts)
            .with_revisit_interval(config.revisit_interval);
        let engine = Arc::new(RuleEngine::with_defaults(ctx));

        Ok(Self {
            config,
            pipeline,
            engine,
        })
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// The ingestion pipeline; shut it down after the proxy has stopped.
    pub fn pipeline(&self) -> Arc<IngestPipeline> {
        Arc::clone(&self.pipeline)
    }

    /// Returns the CA certificate path for installation on the client.
    pub fn ca_cert_path(&self) -> PathBuf {
        self.config.ca_manager.cert_path()
    }

    /// Returns the CA certificate as PEM.
    pub fn ca_cert_pem(&self) -> Result<String> {
        self.config
            .ca_manager
            .read_cert_pem()
            .map_err(ProxyError::Ca)
    }

    /// Starts the proxy server in the background.
    ///
    /// Returns a handle that can be used to stop the server.
    pub fn start(self) -> Result<ProxyHandle> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let addr = self.config.addr;

        // Load CA authority before spawning
        let signing = self.config.ca_manager.ensure_ca().map_err(ProxyError::Ca)?;
        let authority = CachingAuthority::new(signing)?;
        let handler = ProxyHandler::new(Arc::clone(&self.engine), self.config.hosts.clone());

        info!("Starting MITM proxy on {}", addr);
        info!("CA certificate: {:?}", self.ca_cert_path());
        info!(hosts = ?self.config.hosts.hosts(), rules = ?self.engine.names(), "Intercepting");

        let proxy = Proxy::builder()
            .with_addr(addr)
            .with_ca(authority)
            .with_rustls_connector(default_provider())
            .with_http_handler(handler)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .build()
            .map_err(|e| ProxyError::Server(e.to_string()))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = proxy.start().await {
                error!("Proxy error: {}", e);
            }
            info!("Proxy server stopped");
        });

        Ok(ProxyHandle {
            shutdown_tx,
            addr,
            grace_period: self.config.grace_period,
            handle,
        })
    }
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    grace_period: Duration,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to stop accepting connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Stops the proxy, giving open connections the grace period to finish.
    /// Connections still open afterwards are dropped.
    pub async fn stop(mut self) {
        self.shutdown();
        if tokio::time::timeout(self.grace_period, &mut self.handle)
            .await
            .is_err()
        {
            warn!(
                grace_secs = self.grace_period.as_secs(),
                "Open connections did not finish in time, aborting"
            );
            self.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> ProxyConfig {
        let ca_manager = CaManager::new(temp_dir.path().join("ca"));
        ProxyConfig::with_ca_manager_defaults(ca_manager).with_port(0)
    }

    #[test]
    fn proxy_config_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ProxyConfig::with_ca_manager_defaults(CaManager::new(temp_dir.path()));

        assert_eq!(config.addr.port(), DEFAULT_PROXY_PORT);
        assert!(config.hosts.contains("mp.weixin.qq.com"));
        assert_eq!(config.pipeline.workers, 10);
        assert_eq!(config.pipeline.capacity, 100);
        assert_eq!(config.grace_period, DEFAULT_GRACE_PERIOD);
    }

    #[test]
    fn proxy_config_with_addr() {
        let temp_dir = TempDir::new().unwrap();
        let addr = SocketAddr::from(([0, 0, 0, 0], 9999));
        let config = test_config(&temp_dir).with_addr(addr);
        assert_eq!(config.addr, addr);
    }

    #[tokio::test]
    async fn proxy_server_ca_paths() {
        let temp_dir = TempDir::new().unwrap();
        let server = ProxyServer::new(test_config(&temp_dir), Database::in_memory().unwrap())
            .unwrap();

        let cert_path = server.ca_cert_path();
        assert!(cert_path.to_string_lossy().contains("wxbackup-ca.crt"));
        assert!(cert_path.exists());

        let pem = server.ca_cert_pem().unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn proxy_server_requires_runtime() {
        let temp_dir = TempDir::new().unwrap();
        let result = ProxyServer::new(test_config(&temp_dir), Database::in_memory().unwrap());
        assert!(matches!(result, Err(ProxyError::Server(_))));
    }

    #[tokio::test]
    async fn proxy_handle_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir).with_grace_period(Duration::from_secs(2));
        let server = ProxyServer::new(config, Database::in_memory().unwrap()).unwrap();
        let pipeline = server.pipeline();

        let handle = server.start().unwrap();

        // Give it a moment to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.stop().await;
        pipeline.shutdown().await;
    }
}
