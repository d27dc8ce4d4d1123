//! Certificate trust policies
//!
//! The main backend is verified against the standard web PKI, optionally
//! narrowed by SPKI pins. Alternative routing domains have no relation to
//! the backend's identity, so for them the only trust anchor is the leaf
//! certificate's public key: hostname and chain are not checked, and a key
//! outside the allow-list fails the handshake.
//!
//! Pins are `base64(sha256(SubjectPublicKeyInfo DER))`.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{Error, Result};

/// Which trust anchor a client is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PinningPolicy {
    /// System/web PKI trust, plus optional SPKI pins that must also match
    TrustStore {
        /// Extra pins; empty means chain validation alone
        extra_key_hashes: BTreeSet<String>,
    },
    /// Only leaves whose SPKI hash is listed are accepted
    ExplicitKeyHashes(BTreeSet<String>),
}

impl PinningPolicy {
    /// Policy for the main backend
    pub fn trust_store<I, S>(extra_key_hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::TrustStore {
            extra_key_hashes: extra_key_hashes.into_iter().map(Into::into).collect(),
        }
    }

    /// Policy for alternative routing domains
    pub fn explicit<I, S>(key_hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ExplicitKeyHashes(key_hashes.into_iter().map(Into::into).collect())
    }

    /// Whether this is the pin-only proxy policy
    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::ExplicitKeyHashes(_))
    }
}

/// Pin for an SPKI DER blob
pub fn spki_der_sha256_base64(spki_der: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(spki_der))
}

/// Pin for the public key of a DER certificate
pub fn spki_sha256_base64(cert_der: &[u8]) -> Result<String> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| Error::tls(format!("Unparseable certificate: {}", e)))?;
    Ok(spki_der_sha256_base64(cert.public_key().raw))
}

/// Accepts a server purely on its leaf public key
#[derive(Debug)]
pub struct PinnedKeyVerifier {
    allowed: BTreeSet<String>,
    provider: Arc<CryptoProvider>,
}

impl PinnedKeyVerifier {
    /// Create a verifier for `allowed` pins
    pub fn new(allowed: BTreeSet<String>, provider: Arc<CryptoProvider>) -> Self {
        Self { allowed, provider }
    }
}

impl ServerCertVerifier for PinnedKeyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let pin = spki_sha256_base64(end_entity.as_ref())
            .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;

        if self.allowed.contains(&pin) {
            Ok(ServerCertVerified::assertion())
        } else {
            warn!("Rejecting {:?}: leaf key {} is not pinned", server_name, pin);
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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

/// Web PKI verification, then an optional SPKI pin check on the leaf
#[derive(Debug)]
pub struct TrustStoreVerifier {
    inner: Arc<WebPkiServerVerifier>,
    extra_key_hashes: BTreeSet<String>,
}

impl TrustStoreVerifier {
    /// Create a verifier over the bundled web PKI roots
    pub fn new(extra_key_hashes: BTreeSet<String>, provider: Arc<CryptoProvider>) -> Result<Self> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| Error::tls(format!("Failed to build web PKI verifier: {}", e)))?;
        Ok(Self {
            inner,
            extra_key_hashes,
        })
    }
}

impl ServerCertVerifier for TrustStoreVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let verified =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;

        if self.extra_key_hashes.is_empty() {
            return Ok(verified);
        }

        let pin = spki_sha256_base64(end_entity.as_ref())
            .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;
        if self.extra_key_hashes.contains(&pin) {
            Ok(verified)
        } else {
            warn!("Main backend {:?} presented an unpinned key", server_name);
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Build a verifier for `policy`
pub fn verifier_for(
    policy: &PinningPolicy,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn ServerCertVerifier>> {
    Ok(match policy {
        PinningPolicy::TrustStore { extra_key_hashes } => {
            Arc::new(TrustStoreVerifier::new(extra_key_hashes.clone(), provider)?)
        }
        PinningPolicy::ExplicitKeyHashes(allowed) => {
            Arc::new(PinnedKeyVerifier::new(allowed.clone(), provider))
        }
    })
}

/// TLS client configuration bound to exactly one policy
///
/// No client certificate is ever presented.
pub fn tls_config_for(policy: &PinningPolicy) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = verifier_for(policy, provider.clone())?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::tls(format!("Unsupported protocol versions: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    Ok(config)
}

/// Whether `err` (or anything it wraps) is a rejected server certificate
pub fn is_certificate_rejection(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(tls) = e.downcast_ref::<rustls::Error>() {
            return matches!(tls, rustls::Error::InvalidCertificate(_));
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && let Some(inner) = io.get_ref()
            && is_certificate_rejection(inner)
        {
            return true;
        }
        current = e.source();
    }
    false
}
