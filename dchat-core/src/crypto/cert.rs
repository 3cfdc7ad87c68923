//! Self-signed certificates bound to the transport key pair
//!
//! The certificate key is the Ed25519 transport key derived from the root
//! seed, so regenerating the certificate from the same seed always yields the
//! same public key.

use super::codec::encode_b64;
use super::errors::{CryptoError, CryptoResult};
use super::keys::KeyManager;
use chrono::{Datelike, Duration, Utc};
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair, KeyUsagePurpose,
};
use std::net::IpAddr;

/// Organization written into every generated certificate subject
const CERT_ORGANIZATION: &str = "DecentralizedChat";

/// Default validity window
pub const DEFAULT_VALID_DAYS: u32 = 365;

/// PEM certificate and key for cluster TLS
#[derive(Clone)]
pub struct TlsCertificate {
    pub cert_pem: String,
    pub private_key_pem: String,
    /// Transport public key, base64
    pub public_key: String,
}

impl std::fmt::Debug for TlsCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCertificate")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Generate a self-signed certificate covering `hosts` and `ips`
    ///
    /// Usable for both server and client authentication so the same
    /// certificate serves inbound and outbound cluster links.
    pub fn generate_tls_certificate(
        &self,
        hosts: &[String],
        ips: &[IpAddr],
        valid_days: u32,
    ) -> CryptoResult<TlsCertificate> {
        let signing_key = self.transport_signing_key();
        let key_pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Certificate(format!("encode transport key: {}", e)))?;
        let key_pair = KeyPair::from_pem(&key_pem)
            .map_err(|e| CryptoError::Certificate(format!("load transport key: {}", e)))?;

        let mut names: Vec<String> = hosts.to_vec();
        names.extend(ips.iter().map(|ip| ip.to_string()));
        names.dedup();

        let mut params = CertificateParams::new(names)
            .map_err(|e| CryptoError::Certificate(format!("invalid subject name: {}", e)))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, CERT_ORGANIZATION);
        dn.push(DnType::CommonName, self.public_identity());
        params.distinguished_name = dn;

        let today = Utc::now().date_naive();
        let expiry = today + Duration::days(i64::from(valid_days.max(1)));
        params.not_before = rcgen::date_time_ymd(today.year(), today.month() as u8, today.day() as u8);
        params.not_after = rcgen::date_time_ymd(expiry.year(), expiry.month() as u8, expiry.day() as u8);

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CryptoError::Certificate(format!("self-sign: {}", e)))?;

        Ok(TlsCertificate {
            cert_pem: cert.pem(),
            private_key_pem: key_pair.serialize_pem(),
            public_key: encode_b64(signing_key.verifying_key().as_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::nkey;

    fn manager() -> KeyManager {
        KeyManager::from_seed(&nkey::encode_user_seed(&[21u8; 32])).unwrap()
    }

    #[test]
    fn test_generates_pem_material() {
        let cert = manager()
            .generate_tls_certificate(
                &["localhost".to_string()],
                &["127.0.0.1".parse().unwrap()],
                DEFAULT_VALID_DAYS,
            )
            .unwrap();

        assert!(cert.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(cert.private_key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_certificate_key_is_transport_key() {
        let km = manager();
        let cert = km.generate_tls_certificate(&["localhost".to_string()], &[], 30).unwrap();
        assert_eq!(cert.public_key, km.transport_key_pair().public_key_b64());
    }

    #[test]
    fn test_certificate_parses_with_pemfile() {
        let cert = manager()
            .generate_tls_certificate(&["node.local".to_string()], &["::1".parse().unwrap()], 1)
            .unwrap();

        let certs: Vec<_> = rustls_pemfile::certs(&mut cert.cert_pem.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(certs.len(), 1);

        let key = rustls_pemfile::private_key(&mut cert.private_key_pem.as_bytes()).unwrap();
        assert!(key.is_some());
    }

    #[test]
    fn test_debug_hides_private_key() {
        let cert = manager().generate_tls_certificate(&["localhost".to_string()], &[], 1).unwrap();
        assert!(!format!("{:?}", cert).contains("PRIVATE KEY"));
    }
}
