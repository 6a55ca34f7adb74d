use batch_worker_core::{Result, WorkerError};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Key material locations. An empty path means "not configured".
#[derive(Debug, Clone, Default)]
pub struct CredentialPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Extra trust anchor for the server certificate, on top of the web PKI roots
    pub server_ca_path: Option<PathBuf>,
}

impl CredentialPaths {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        CredentialPaths {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            server_ca_path: None,
        }
    }

    pub fn with_server_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_ca_path = Some(path.into());
        self
    }
}

/// Negotiation context for the outbound channel, built once at startup.
#[derive(Clone)]
pub struct TransportSecurity {
    config: Arc<ClientConfig>,
    mutual: bool,
}

impl std::fmt::Debug for TransportSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSecurity")
            .field("mutual", &self.mutual)
            .finish_non_exhaustive()
    }
}

impl TransportSecurity {
    /// Load credentials from disk.
    ///
    /// Returns `Ok(None)` when neither a client identity nor a server CA is
    /// configured: the channel then runs in cleartext.
    pub fn load(paths: &CredentialPaths) -> Result<Option<Self>> {
        let provider = Arc::new(ring::default_provider());

        let identity = match (is_unset(&paths.cert_path), is_unset(&paths.key_path)) {
            (true, true) => None,
            (false, false) => Some(load_identity(&provider, &paths.cert_path, &paths.key_path)?),
            (true, false) => {
                return Err(WorkerError::configuration(format!(
                    "client key path {} is set but the client certificate path is empty",
                    paths.key_path.display()
                )))
            }
            (false, true) => {
                return Err(WorkerError::configuration(format!(
                    "client certificate path {} is set but the client key path is empty",
                    paths.cert_path.display()
                )))
            }
        };

        let server_ca = paths.server_ca_path.as_deref().filter(|p| !is_unset(p));
        if identity.is_none() && server_ca.is_none() {
            return Ok(None);
        }

        let roots = root_store(server_ca)?;
        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| WorkerError::Credential(e.to_string()))?
            .with_root_certificates(roots);

        let mutual = identity.is_some();
        let config = match identity {
            Some((certs, key)) => builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| WorkerError::Credential(format!("client identity rejected: {}", e)))?,
            None => builder.with_no_client_auth(),
        };

        if mutual {
            info!(
                "Loaded client certificate {} for mutual TLS",
                paths.cert_path.display()
            );
        }

        Ok(Some(TransportSecurity {
            config: Arc::new(config),
            mutual,
        }))
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    pub fn is_mutual(&self) -> bool {
        self.mutual
    }
}

fn is_unset(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| WorkerError::io(path, e))
}

fn parse_certificates(pem: &[u8], path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            WorkerError::Credential(format!("invalid certificate PEM in {}: {}", path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(WorkerError::Credential(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_identity(
    provider: &CryptoProvider,
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    // Both files must exist before either is parsed, so a missing file is
    // always reported as such.
    let cert_pem = read_file(cert_path)?;
    let key_pem = read_file(key_path)?;

    let certs = parse_certificates(&cert_pem, cert_path)?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| {
            WorkerError::Credential(format!("invalid key PEM in {}: {}", key_path.display(), e))
        })?
        .ok_or_else(|| {
            WorkerError::Credential(format!("no private key found in {}", key_path.display()))
        })?;

    let signing_key = provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| {
            WorkerError::Credential(format!("unusable private key in {}: {}", key_path.display(), e))
        })?;

    // Some key types cannot report their public half; only a proven mismatch is fatal.
    match CertifiedKey::new(certs.clone(), signing_key).keys_match() {
        Ok(()) | Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {}
        Err(e) => {
            return Err(WorkerError::Credential(format!(
                "private key {} does not match certificate {}: {}",
                key_path.display(),
                cert_path.display(),
                e
            )))
        }
    }

    Ok((certs, key))
}

fn root_store(server_ca: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = server_ca {
        let pem = read_file(path)?;
        for cert in parse_certificates(&pem, path)? {
            roots.add(cert).map_err(|e| {
                WorkerError::Credential(format!("invalid CA certificate in {}: {}", path.display(), e))
            })?;
        }
    }

    Ok(roots)
}
