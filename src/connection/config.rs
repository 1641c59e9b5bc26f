use base64::{engine::general_purpose::STANDARD, Engine as _};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::ConnectError;

/// Production keepalive period.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RECORD_BUFFER: usize = 1024;
pub const DEFAULT_ERROR_BUFFER: usize = 64;

/// Per-connection tuning.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Period between keepalive writes.
    pub keepalive_interval: Duration,
    /// Upper bound on dial + proxy + TLS + WebSocket upgrade.
    pub connect_timeout: Duration,
    /// Capacity of the records channel. The read pump waits when it is full.
    pub record_buffer: usize,
    /// Capacity of the errors channel. Errors beyond it are dropped.
    pub error_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            record_buffer: DEFAULT_RECORD_BUFFER,
            error_buffer: DEFAULT_ERROR_BUFFER,
        }
    }
}

impl ConnectionConfig {
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// TLS settings. Presence of a `TlsConfig` selects the `wss` scheme.
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Option<Arc<ClientConfig>>,
    insecure: bool,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("custom", &self.client_config.is_some())
            .field("insecure", &self.insecure)
            .finish()
    }
}

impl TlsConfig {
    /// Verify the server against the platform trust store.
    pub fn native_roots() -> Self {
        Self {
            client_config: None,
            insecure: false,
        }
    }

    /// Accept any server certificate. Only for test rigs and self-signed
    /// development aggregators.
    pub fn insecure_skip_verify() -> Self {
        Self {
            client_config: None,
            insecure: true,
        }
    }

    /// Use a caller-built rustls configuration as is.
    pub fn from_client_config(config: Arc<ClientConfig>) -> Self {
        Self {
            client_config: Some(config),
            insecure: false,
        }
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    /// Resolve into the rustls configuration used for the handshake.
    pub(crate) fn client_config(&self) -> Result<Arc<ClientConfig>, ConnectError> {
        if let Some(config) = &self.client_config {
            return Ok(Arc::clone(config));
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| ConnectError::Tls(e.to_string()))?;

        let config = if self.insecure {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
                .with_no_client_auth()
        } else {
            builder
                .with_root_certificates(native_root_store()?)
                .with_no_client_auth()
        };

        Ok(Arc::new(config))
    }
}

fn native_root_store() -> Result<RootCertStore, ConnectError> {
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        warn!(error = %err, "failed to load some native root certificates");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    if added == 0 {
        return Err(ConnectError::Tls(format!(
            "no usable root certificates found ({} ignored)",
            ignored
        )));
    }
    Ok(roots)
}

#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// HTTP proxy reached with `CONNECT`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    /// `host:port` of the proxy.
    pub address: String,
    credentials: Option<(String, String)>,
}

impl ProxyConfig {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let address = address
            .strip_prefix("http://")
            .unwrap_or(&address)
            .trim_end_matches('/')
            .to_string();
        Self {
            address,
            credentials: None,
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Value for the `Proxy-Authorization` header, if credentials were set.
    pub(crate) fn authorization(&self) -> Option<String> {
        self.credentials
            .as_ref()
            .map(|(user, pass)| format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass))))
    }
}
