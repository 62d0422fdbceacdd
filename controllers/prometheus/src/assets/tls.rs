//! PEM validation of TLS material.
//!
//! Certificates are parsed with webpki, the same parser rustls verifies
//! peers with. A certificate and key form a keypair when rustls accepts
//! the key and the certificate's public key matches it.

use rustls::sign::CertifiedKey;
use rustls_pki_types::pem::{self, PemObject};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to decode PEM block: {0}")]
    Pem(#[from] pem::Error),

    #[error("no certificate found in PEM data")]
    NoCertificate,

    #[error("failed to parse certificate: {0}")]
    Certificate(#[from] webpki::Error),

    #[error("unusable private key: {0}")]
    Key(#[source] rustls::Error),

    #[error("certificate and key do not match: {0}")]
    Mismatch(#[source] rustls::Error),
}

/// Every certificate in `pem` must parse as an X.509 trust anchor.
pub fn validate_ca(pem: &[u8]) -> Result<(), TlsError> {
    let mut count = 0usize;
    for cert in CertificateDer::pem_slice_iter(pem) {
        let cert = cert?;
        webpki::anchor_from_trusted_cert(&cert)?;
        count += 1;
    }
    if count == 0 {
        return Err(TlsError::NoCertificate);
    }
    Ok(())
}

/// The leaf certificate of `cert_pem` and the key in `key_pem` must match.
pub fn validate_keypair(cert_pem: &[u8], key_pem: &[u8]) -> Result<(), TlsError> {
    let cert = CertificateDer::from_pem_slice(cert_pem)?;
    webpki::EndEntityCert::try_from(&cert)?;

    let key = PrivateKeyDer::from_pem_slice(key_pem)?;
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key).map_err(TlsError::Key)?;

    CertifiedKey::new(vec![cert], signing_key)
        .keys_match()
        .map_err(TlsError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CA: &str = include_str!("testdata/ca.pem");
    const CERT: &str = include_str!("testdata/client.pem");
    const KEY: &str = include_str!("testdata/client.key");
    const OTHER_KEY: &str = include_str!("testdata/other.key");

    #[test]
    fn test_valid_ca() {
        assert!(validate_ca(CA.as_bytes()).is_ok());
    }

    #[test]
    fn test_invalid_ca() {
        assert!(matches!(validate_ca(b"not a pem"), Err(TlsError::NoCertificate)));
        let garbage = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        assert!(matches!(
            validate_ca(garbage.as_bytes()),
            Err(TlsError::Certificate(_))
        ));
    }

    #[test]
    fn test_matching_keypair() {
        assert!(validate_keypair(CERT.as_bytes(), KEY.as_bytes()).is_ok());
    }

    #[test]
    fn test_mismatched_keypair() {
        let err = validate_keypair(CERT.as_bytes(), OTHER_KEY.as_bytes()).unwrap_err();
        assert!(matches!(err, TlsError::Mismatch(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_key_in_place_of_cert() {
        assert!(validate_keypair(KEY.as_bytes(), KEY.as_bytes()).is_err());
    }
}
