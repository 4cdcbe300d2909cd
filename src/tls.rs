//! Mutual TLS setup and certificate-based peer identity (component C6).
//!
//! Grounded in the `other_examples` mTLS references (`mpc-net` and
//! `mtls_node` production files): require a client certificate on the server
//! side, and on the client side verify the server's certificate chain
//! against the shared CA while explicitly disabling hostname verification —
//! peers are identified by certificate identity (issuer CN + serial), never
//! by hostname, matching spec.md §4.6.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig, SignatureScheme};

use crate::error::{CommError, Result};
use crate::identity::PeerIdentity;

/// Loads a PEM certificate chain from disk.
pub fn load_cert_chain(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CommError::Tls(format!("reading certificate chain: {e}")))
}

/// Loads a PEM private key from disk.
pub fn load_private_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| CommError::Tls(format!("reading private key: {e}")))?
        .ok_or_else(|| CommError::Tls("no private key found in file".into()))
}

/// Loads a PEM CA bundle into a [`RootCertStore`].
pub fn load_root_store(path: impl AsRef<Path>) -> Result<RootCertStore> {
    let certs = load_cert_chain(path)?;
    let mut store = RootCertStore::empty();
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| CommError::Tls(format!("adding CA certificate: {e}")))?;
    }
    Ok(store)
}

/// Builds a server TLS config that requires and authenticates a client
/// certificate against `ca_bundle`, matching `create_ssl_context`'s
/// `CERT_REQUIRED` server-side behavior in `pool.py`.
pub fn server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    ca_bundle: &RootCertStore,
) -> Result<ServerConfig> {
    let verifier = WebPkiClientVerifier::builder(Arc::new(ca_bundle.clone()))
        .build()
        .map_err(|e| CommError::Tls(format!("building client verifier: {e}")))?;
    ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, key)
        .map_err(|e| CommError::Tls(format!("building server config: {e}")))
}

/// Builds a client TLS config that presents `cert_chain`/`key` for mutual
/// authentication, and verifies the server's chain against `ca_bundle`
/// while skipping hostname verification (peers are addressed by IP:port or
/// certificate identity, never DNS name).
pub fn client_config(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    ca_bundle: RootCertStore,
) -> Result<ClientConfig> {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoHostnameVerification { roots: ca_bundle }))
        .with_client_auth_cert(cert_chain, key)
        .map_err(|e| CommError::Tls(format!("building client config: {e}")))
}

/// Verifies the server's certificate chain is signed by a trusted CA, but
/// never checks it against the connection's hostname/IP.
#[derive(Debug)]
struct NoHostnameVerification {
    roots: RootCertStore,
}

impl ServerCertVerifier for NoHostnameVerification {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        // Peers are addressed by IP or certificate identity, never DNS name,
        // so the name the connection was dialed under is irrelevant here.
        // That does not mean trust verification is skipped: the presented
        // name is derived from the certificate's own SAN, so chain-of-trust
        // against `self.roots` is still fully checked by the inner verifier
        // — only the "does the name match where we dialed" check is made
        // moot, never the "is this cert actually signed by our CA" check.
        let name = server_name_from_cert(end_entity)?;
        let verifier = rustls::client::WebPkiServerVerifier::builder(Arc::new(self.roots.clone()))
            .build()
            .map_err(|e| rustls::Error::General(e.to_string()))?;
        verifier.verify_server_cert(end_entity, intermediates, &name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Derives a [`ServerName`] from the end-entity certificate's own subject
/// alternative name, so the inner verifier's name check is satisfied by
/// construction while its chain-of-trust check still runs for real.
fn server_name_from_cert(der: &CertificateDer<'_>) -> std::result::Result<ServerName<'static>, rustls::Error> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(der.as_ref())
        .map_err(|e| rustls::Error::General(format!("parsing server certificate: {e}")))?;

    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in san.value.general_names.iter() {
            match name {
                x509_parser::extensions::GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_san_bytes(bytes) {
                        return Ok(ServerName::IpAddress(ip.into()));
                    }
                }
                x509_parser::extensions::GeneralName::DNSName(dns) => {
                    if let Ok(name) = ServerName::try_from(dns.to_string()) {
                        return Ok(name);
                    }
                }
                _ => {}
            }
        }
    }
    Err(rustls::Error::General("server certificate has no usable subjectAltName".into()))
}

fn ip_from_san_bytes(bytes: &[u8]) -> Option<std::net::IpAddr> {
    match bytes.len() {
        4 => Some(std::net::IpAddr::V4(std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            Some(std::net::IpAddr::V6(std::net::Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Extracts the issuer common name and serial number from the end-entity
/// certificate of a completed handshake, producing the identity string
/// `_post_handler` derives from `request.transport.get_extra_info("peercert")`.
pub fn peer_identity_from_cert(der: &CertificateDer<'_>) -> Result<PeerIdentity> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(der.as_ref())
        .map_err(|e| CommError::InvalidCertificate(e.to_string()))?;
    let issuer_cn = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .ok_or_else(|| CommError::InvalidCertificate("certificate has no issuer CN".into()))?
        .to_string();
    // `raw_serial_as_string()` yields colon-separated hex; the identity
    // string is `<CN>:<serial>` with the serial as a decimal integer,
    // matching `int(client_cert["serialNumber"], 16)` in httphandlers.py:360.
    let serial = cert.serial.to_str_radix(10);
    Ok(PeerIdentity::Certificate { issuer_cn, serial })
}
