//! Mutual TLS for cluster route links
//!
//! Both ends of a route present a certificate. In the default skip-verify
//! mode any peer certificate is accepted, which only authenticates that the
//! peer holds *some* key and offers no protection against an active
//! man-in-the-middle. With verification enabled, peers must present one of
//! the trusted certificates (or this node's own).

use super::error::{BrokerError, BrokerResult};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Certificate material and verification policy for route links
#[derive(Clone)]
pub struct ClusterTls {
    pub cert_pem: String,
    pub key_pem: String,
    /// Extra peer certificates accepted when verifying
    pub trusted_peers: Vec<String>,
    pub insecure_skip_verify: bool,
    pub handshake_timeout: Duration,
}

impl std::fmt::Debug for ClusterTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterTls")
            .field("trusted_peers", &self.trusted_peers.len())
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

impl ClusterTls {
    pub fn new(cert_pem: String, key_pem: String) -> Self {
        Self {
            cert_pem,
            key_pem,
            trusted_peers: Vec::new(),
            insecure_skip_verify: true,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_verification(mut self, trusted_peers: Vec<String>) -> Self {
        self.insecure_skip_verify = false;
        self.trusted_peers = trusted_peers;
        self
    }

    /// Build the acceptor and connector used by the route layer
    pub fn build(&self) -> BrokerResult<RouteTls> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let certs = load_certs(&self.cert_pem)?;
        let key = load_key(&self.key_pem)?;

        let client_verifier: Arc<dyn ClientCertVerifier> = if self.insecure_skip_verify {
            Arc::new(AcceptAnyClientCert {
                provider: provider.clone(),
            })
        } else {
            WebPkiClientVerifier::builder_with_provider(Arc::new(self.root_store()?), provider.clone())
                .build()
                .map_err(|e| BrokerError::Tls(e.to_string()))?
        };

        let server = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| BrokerError::Tls(e.to_string()))?
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(certs.clone(), key.clone_key())
            .map_err(|e| BrokerError::Tls(e.to_string()))?;

        let client_builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| BrokerError::Tls(e.to_string()))?;
        let client = if self.insecure_skip_verify {
            client_builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier { provider }))
                .with_client_auth_cert(certs, key)
        } else {
            client_builder
                .with_root_certificates(self.root_store()?)
                .with_client_auth_cert(certs, key)
        };
        let client = client.map_err(|e| BrokerError::Tls(e.to_string()))?;

        Ok(RouteTls {
            acceptor: TlsAcceptor::from(Arc::new(server)),
            connector: TlsConnector::from(Arc::new(client)),
            handshake_timeout: self.handshake_timeout,
        })
    }

    fn root_store(&self) -> BrokerResult<RootCertStore> {
        let mut roots = RootCertStore::empty();
        for pem in std::iter::once(&self.cert_pem).chain(self.trusted_peers.iter()) {
            for cert in load_certs(pem)? {
                roots.add(cert).map_err(|e| BrokerError::Tls(e.to_string()))?;
            }
        }
        Ok(roots)
    }
}

/// Ready-to-use TLS endpoints for route connections
#[derive(Clone)]
pub struct RouteTls {
    acceptor: TlsAcceptor,
    connector: TlsConnector,
    handshake_timeout: Duration,
}

impl RouteTls {
    pub async fn accept(&self, stream: TcpStream) -> BrokerResult<tokio_rustls::TlsStream<TcpStream>> {
        let stream = tokio::time::timeout(self.handshake_timeout, self.acceptor.accept(stream))
            .await
            .map_err(|_| BrokerError::Timeout("TLS handshake".to_string()))?
            .map_err(|e| BrokerError::Tls(e.to_string()))?;
        Ok(tokio_rustls::TlsStream::Server(stream))
    }

    pub async fn connect(
        &self,
        host: &str,
        stream: TcpStream,
    ) -> BrokerResult<tokio_rustls::TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| BrokerError::Tls(format!("invalid server name {}: {}", host, e)))?;
        let stream = tokio::time::timeout(
            self.handshake_timeout,
            self.connector.connect(server_name, stream),
        )
        .await
        .map_err(|_| BrokerError::Timeout("TLS handshake".to_string()))?
        .map_err(|e| BrokerError::Tls(e.to_string()))?;
        Ok(tokio_rustls::TlsStream::Client(stream))
    }
}

fn load_certs(pem: &str) -> BrokerResult<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BrokerError::Tls(format!("failed to parse certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(BrokerError::Tls("no certificate found in PEM".to_string()));
    }
    Ok(certs)
}

fn load_key(pem: &str) -> BrokerResult<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| BrokerError::Tls(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| BrokerError::Tls("no private key found in PEM".to_string()))
}

/// Server certificate verifier that accepts any certificate
#[derive(Debug)]
struct NoVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerifier {
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
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Client certificate verifier that requires a certificate but accepts any
#[derive(Debug)]
struct AcceptAnyClientCert {
    provider: Arc<CryptoProvider>,
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
