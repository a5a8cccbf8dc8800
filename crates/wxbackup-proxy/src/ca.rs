//! Certificate Authority management for the MITM proxy.
//!
//! Loads the root CA used to sign per-host leaf certificates, generating and
//! persisting one on first run. Existing material is never regenerated, so a
//! CA the client already trusts stays valid across restarts.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::CertificateDer;

pub use crate::error::CaManagerError;

/// CA certificate and key file names.
const CA_CERT_FILENAME: &str = "wxbackup-ca.crt";
const CA_KEY_FILENAME: &str = "wxbackup-ca.key";

const CA_COMMON_NAME: &str = "wxbackup Root CA";

/// Root CA material ready to sign leaf certificates.
pub struct SigningMaterial {
    /// Issuer wrapping the CA certificate and its private key.
    pub issuer: Issuer<'static, KeyPair>,
    /// The CA certificate, appended to every leaf chain.
    pub ca_cert_der: CertificateDer<'static>,
}

impl std::fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("ca_cert_der", &self.ca_cert_der.len())
            .finish_non_exhaustive()
    }
}

/// Manages the root CA certificate for the MITM proxy.
#[derive(Debug, Clone)]
pub struct CaManager {
    ca_dir: PathBuf,
}

impl CaManager {
    /// Creates a new CA manager with the given directory.
    pub fn new(ca_dir: impl AsRef<Path>) -> Self {
        Self {
            ca_dir: ca_dir.as_ref().to_path_buf(),
        }
    }

    /// Creates a CA manager using the default data directory.
    pub fn with_default_dir() -> Result<Self, CaManagerError> {
        let project_dirs = directories::ProjectDirs::from("com", "wxbackup", "wxbackup")
            .ok_or(CaManagerError::NoDataDir)?;

        Ok(Self::new(project_dirs.data_dir().join("ca")))
    }

    /// Returns the CA directory.
    pub fn ca_dir(&self) -> &Path {
        &self.ca_dir
    }

    /// Returns the path to the CA certificate file.
    pub fn cert_path(&self) -> PathBuf {
        self.ca_dir.join(CA_CERT_FILENAME)
    }

    /// Returns the path to the CA private key file.
    pub fn key_path(&self) -> PathBuf {
        self.ca_dir.join(CA_KEY_FILENAME)
    }

    /// Checks if the CA certificate exists.
    pub fn ca_exists(&self) -> bool {
        self.cert_path().exists() && self.key_path().exists()
    }

    /// Ensures the CA exists, generating it if necessary, and loads it.
    pub fn ensure_ca(&self) -> Result<SigningMaterial, CaManagerError> {
        if !self.ca_exists() {
            self.generate_ca()?;
        }
        self.load_signing_material()
    }

    /// Generates a new root CA certificate and key.
    pub fn generate_ca(&self) -> Result<(), CaManagerError> {
        fs::create_dir_all(&self.ca_dir)?;

        let key_pair =
            KeyPair::generate().map_err(|e| CaManagerError::Generation(e.to_string()))?;

        let mut params = CertificateParams::default();
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, CA_COMMON_NAME);
        name.push(DnType::OrganizationName, "wxbackup");
        params.distinguished_name = name;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CaManagerError::Generation(e.to_string()))?;

        write_file(&self.cert_path(), &cert.pem())?;
        write_file(&self.key_path(), &key_pair.serialize_pem())?;

        tracing::info!("Generated new CA certificate at {:?}", self.cert_path());

        Ok(())
    }

    /// Loads the CA certificate and key for signing.
    pub fn load_signing_material(&self) -> Result<SigningMaterial, CaManagerError> {
        let cert_pem = fs::read_to_string(self.cert_path())?;
        let key_pem = fs::read_to_string(self.key_path())?;

        let key_pair =
            KeyPair::from_pem(&key_pem).map_err(|e| CaManagerError::Parse(e.to_string()))?;

        let ca_cert_der = rustls_pemfile::certs(&mut BufReader::new(cert_pem.as_bytes()))
            .next()
            .ok_or_else(|| CaManagerError::Parse("no certificate in CA file".into()))??;

        let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair)
            .map_err(|e| CaManagerError::Parse(e.to_string()))?;

        Ok(SigningMaterial {
            issuer,
            ca_cert_der,
        })
    }

    /// Reads the CA certificate as PEM text, for installation on the client.
    pub fn read_cert_pem(&self) -> Result<String, CaManagerError> {
        Ok(fs::read_to_string(self.cert_path())?)
    }

    /// Reads the CA certificate as DER bytes.
    pub fn read_cert_der(&self) -> Result<Vec<u8>, CaManagerError> {
        let parsed = pem::parse(self.read_cert_pem()?)
            .map_err(|e| CaManagerError::Parse(e.to_string()))?;
        Ok(parsed.contents().to_vec())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), CaManagerError> {
    fs::write(path, contents).map_err(|source| CaManagerError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ca_manager_paths() {
        let manager = CaManager::new("/tmp/test-ca");
        assert_eq!(
            manager.cert_path(),
            PathBuf::from("/tmp/test-ca/wxbackup-ca.crt")
        );
        assert_eq!(
            manager.key_path(),
            PathBuf::from("/tmp/test-ca/wxbackup-ca.key")
        );
    }

    #[test]
    fn ca_manager_not_exists_initially() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path().join("ca"));
        assert!(!manager.ca_exists());
    }

    #[test]
    fn ca_manager_ensure_ca_generates_if_missing() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path().join("ca"));

        let material = manager.ensure_ca().unwrap();
        assert!(manager.ca_exists());
        assert!(!material.ca_cert_der.is_empty());
    }

    #[test]
    fn ca_manager_does_not_regenerate() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path().join("ca"));

        manager.ensure_ca().unwrap();
        let first = manager.read_cert_pem().unwrap();

        manager.ensure_ca().unwrap();
        let second = manager.read_cert_pem().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn ca_manager_der_matches_loaded_chain() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path().join("ca"));

        let material = manager.ensure_ca().unwrap();
        let der = manager.read_cert_der().unwrap();

        assert_eq!(der.as_slice(), material.ca_cert_der.as_ref());
    }

    #[test]
    fn ca_manager_reports_unwritable_dir() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("ca");
        fs::write(&blocker, "file in the way").unwrap();

        let manager = CaManager::new(&blocker);
        assert!(manager.generate_ca().is_err());
        assert!(!manager.ca_exists());
    }

    #[test]
    fn ca_manager_rejects_corrupt_key() {
        let temp_dir = TempDir::new().unwrap();
        let manager = CaManager::new(temp_dir.path().join("ca"));
        manager.generate_ca().unwrap();

        fs::write(manager.key_path(), "not a key").unwrap();
        assert!(matches!(
            manager.load_signing_material(),
            Err(CaManagerError::Parse(_))
        ));
    }
}
