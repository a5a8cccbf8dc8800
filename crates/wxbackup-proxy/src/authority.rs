//! Leaf certificate issuance for intercepted hosts.
//!
//! Implements hudsucker's [`CertificateAuthority`] on top of [`CertCache`]:
//! each host gets one rustls server config, minted from the root CA on first
//! connection and reused afterwards.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use hudsucker::certificate_authority::CertificateAuthority;
use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hyper::http::uri::Authority;
use rcgen::{
    date_time_ymd, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tracing::{debug, error};

use crate::ca::SigningMaterial;
use crate::cert_cache::CertCache;
use crate::error::{ProxyError, Result};

/// Certificate authority that caches one server config per host.
pub struct CachingAuthority {
    signing: SigningMaterial,
    cache: CertCache<ServerConfig>,
    provider: Arc<CryptoProvider>,
    /// Served when issuance fails; the handshake for that connection fails.
    fallback: Arc<ServerConfig>,
}

impl std::fmt::Debug for CachingAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingAuthority")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl CachingAuthority {
    /// Creates an authority signing with the given root CA.
    pub fn new(signing: SigningMaterial) -> Result<Self> {
        let provider = Arc::new(default_provider());

        let fallback = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| ProxyError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(NoCertificate));

        Ok(Self {
            signing,
            cache: CertCache::new(),
            provider,
            fallback: Arc::new(fallback),
        })
    }

    /// Returns the server config for `host`, issuing it on first use.
    pub fn server_config(&self, host: &str) -> Arc<ServerConfig> {
        match self.cache.fetch(host, || self.issue(host)) {
            Ok(config) => config,
            Err(e) => {
                error!(host, "Certificate issuance failed: {}", e);
                Arc::clone(&self.fallback)
            }
        }
    }

    /// Number of hosts with a cached certificate.
    pub fn cached_hosts(&self) -> usize {
        self.cache.len()
    }

    /// Mints a leaf certificate for `host` signed by the root CA.
    fn issue(&self, host: &str) -> Result<ServerConfig> {
        debug!(host, cached = self.cached_hosts(), "Issuing leaf certificate");

        let params = leaf_params(host)?;
        let key = KeyPair::generate().map_err(|e| ProxyError::Tls(e.to_string()))?;
        let cert = params
            .signed_by(&key, &self.signing.issuer)
            .map_err(|e| ProxyError::Tls(e.to_string()))?;

        let chain = vec![cert.der().clone(), self.signing.ca_cert_der.clone()];
        let private_key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));

        let mut config = ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| ProxyError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(chain, private_key)
            .map_err(|e| ProxyError::Tls(e.to_string()))?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(config)
    }
}

impl CertificateAuthority for CachingAuthority {
    async fn gen_server_config(&self, authority: &Authority) -> Arc<ServerConfig> {
        self.server_config(authority.host())
    }
}

/// Leaf parameters: one year of validity starting at the current month.
fn leaf_params(host: &str) -> Result<CertificateParams> {
    let mut params = CertificateParams::new(vec![host.to_string()])
        .map_err(|e| ProxyError::Tls(e.to_string()))?;

    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, host);
    params.distinguished_name = name;
    params.is_ca = IsCa::NoCa;
    params.use_authority_key_identifier_extension = true;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let now = Utc::now();
    let month = now.month() as u8;
    params.not_before = date_time_ymd(now.year(), month, 1);
    params.not_after = date_time_ymd(now.year() + 1, month, 1);

    Ok(params)
}

/// Resolver that never yields a certificate.
#[derive(Debug)]
struct NoCertificate;

impl ResolvesServerCert for NoCertificate {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        None
    }
}
