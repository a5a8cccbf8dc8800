//! wxbackup Proxy - MITM proxy capturing articles and publisher profiles.
//!
//! The client is pointed at this proxy and trusts its root CA. Traffic to the
//! content platform is decrypted, every other tunnel passes through.
//!
//! ## Features
//!
//! - Generates root CA certificate on first run
//! - Issues and caches one leaf certificate per intercepted host
//! - Pairs each matching request with its response into an [`Exchange`]
//! - Dispatches exchanges to content rules by URL and method
//! - Extracts profiles and articles from semi-structured pages
//! - Persists records through a bounded worker pool
//! - Injects an auto-advance script so the client walks publisher histories
//!
//! ## Architecture
//!
//! ```text
//! Client Request → Proxy → Intercepted host?
//!                               │
//!              ┌────────────────┴────────────────┐
//!              │ No                              │ Yes
//!              ▼                                 ▼
//!         Passthrough                      /wx/ endpoint? ──Yes──→ Answered locally
//!                                                │ No
//!                                                ▼
//!                                     Forward, collect response
//!                                                │
//!                                                ▼
//!                                 RuleEngine → extract → IngestPipeline → SQLite
//!                                                │
//!                                                ▼
//!                                    Rewritten response to client
//! ```

mod authority;
mod ca;
mod cert_cache;
mod domains;
mod error;
mod exchange;
pub mod extract;
mod handler;
pub mod pipeline;
mod proxy;
pub mod rules;

pub use authority::CachingAuthority;
pub use ca::{CaManager, CaManagerError, SigningMaterial};
pub use cert_cache::CertCache;
pub use domains::{InterceptHosts, PLATFORM_HOSTS};
pub use error::{ProxyError, Result, RuleError};
pub use exchange::{Exchange, PendingRequest};
pub use handler::{ProxyHandler, LOCAL_PREFIX};
pub use pipeline::{IngestPipeline, PipelineConfig, Record, RecordSink};
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer, DEFAULT_GRACE_PERIOD};
pub use rules::{ContentRule, RuleContext, RuleEngine, ScriptConfig};

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 8080;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_correct() {
        assert_eq!(DEFAULT_PROXY_PORT, 8080);
    }
}
