use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, lookup_host};
use tokio_rustls::TlsConnector;

use super::ProbeError;

/// The network operations a probe needs. Implementations report elapsed
/// time only; timeouts are applied by the caller.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ProbeError>;

    /// Time from connect-start to an established TCP connection.
    async fn tcp_connect(&self, addr: SocketAddr) -> Result<Duration, ProbeError>;

    /// Time from connect-start to a completed TLS handshake.
    async fn tls_handshake(&self, server_name: &str, addr: SocketAddr)
    -> Result<Duration, ProbeError>;
}

/// Real sockets via tokio, TLS via rustls.
pub struct NetDialer {
    tls: TlsConnector,
}

impl NetDialer {
    pub fn new() -> Result<Self, ProbeError> {
        let config = build_tls_config().map_err(|e| ProbeError::Tls(e.to_string()))?;
        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl Dialer for NetDialer {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ProbeError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let mut addrs = lookup_host((host, 0))
            .await
            .map_err(|e| ProbeError::Resolve(format!("{host}: {e}")))?;
        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| ProbeError::Resolve(format!("{host}: no addresses")))
    }

    async fn tcp_connect(&self, addr: SocketAddr) -> Result<Duration, ProbeError> {
        let start = Instant::now();
        TcpStream::connect(addr).await.map_err(ProbeError::Connect)?;
        Ok(start.elapsed())
    }

    async fn tls_handshake(
        &self,
        server_name: &str,
        addr: SocketAddr,
    ) -> Result<Duration, ProbeError> {
        let name = ServerName::try_from(server_name)
            .map_err(|e| ProbeError::Tls(format!("invalid server name {server_name}: {e}")))?
            .to_owned();
        let start = Instant::now();
        let stream = TcpStream::connect(addr).await.map_err(ProbeError::Connect)?;
        self.tls
            .connect(name, stream)
            .await
            .map_err(|e| ProbeError::Tls(e.to_string()))?;
        Ok(start.elapsed())
    }
}

fn build_tls_config() -> Result<rustls::ClientConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(HandshakeOnlyVerifier { provider }))
        .with_no_client_auth();
    Ok(config)
}

/// Accepts any certificate chain but still checks handshake signatures, so
/// the measured handshake costs what a real client would pay.
#[derive(Debug)]
struct HandshakeOnlyVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for HandshakeOnlyVerifier {
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
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
