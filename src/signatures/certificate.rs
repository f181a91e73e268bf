//! X.509 certificate inspection.

use super::types::ValidityError;
use crate::error::{Error, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use der::Decode;
use rsa::pkcs8::DecodePublicKey;
use serde::Serialize;
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};

/// The parts of a certificate shown to users and checked by validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummary {
    pub subject_cn: Option<String>,
    pub issuer_cn: Option<String>,
    /// Serial number as uppercase hex
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateSummary {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|e| Error::InvalidCertificate(format!("cannot parse: {}", e)))?;
        let validity = cert.validity();
        Ok(Self {
            subject_cn: first_cn(cert.subject()),
            issuer_cn: first_cn(cert.issuer()),
            serial: cert.raw_serial().iter().map(|b| format!("{:02X}", b)).collect(),
            not_before: timestamp(validity.not_before.timestamp())?,
            not_after: timestamp(validity.not_after.timestamp())?,
        })
    }

    /// The temporal validity finding at `now`, if any.
    pub fn check_validity(&self, now: DateTime<Utc>) -> Option<ValidityError> {
        if now < self.not_before {
            Some(ValidityError::CertificateNotValidYet)
        } else if now > self.not_after {
            Some(ValidityError::CertificateExpired)
        } else {
            None
        }
    }
}

fn first_cn(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| Error::InvalidCertificate(format!("validity time {} out of range", secs)))
}

/// RSA public key of a DER certificate.
pub fn rsa_public_key(der: &[u8]) -> Result<rsa::RsaPublicKey> {
    use der::Encode;
    let cert = x509_cert::Certificate::from_der(der)?;
    let spki = cert.tbs_certificate.subject_public_key_info.to_der()?;
    rsa::RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| Error::InvalidCertificate(format!("not an RSA key: {}", e)))
}

/// Decode a `;`-separated list of standard or URL-safe base64 certificates.
pub fn decode_chain(text: &str) -> Result<Vec<Vec<u8>>> {
    let chain = text
        .split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| {
            let der = STANDARD
                .decode(c)
                .or_else(|_| URL_SAFE.decode(c))
                .or_else(|_| URL_SAFE_NO_PAD.decode(c))
                .map_err(|e| Error::InvalidCertificate(format!("certificate is not base64: {}", e)))?;
            x509_cert::Certificate::from_der(&der)
                .map_err(|e| Error::InvalidCertificate(format!("certificate is not DER X.509: {}", e)))?;
            Ok(der)
        })
        .collect::<Result<Vec<_>>>()?;
    if chain.is_empty() {
        return Err(Error::InvalidCertificate("empty certificate chain".to_string()));
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use chrono::Duration;

    #[test]
    fn test_summary_of_test_certificate() {
        let summary = CertificateSummary::from_der(test_support::certificate()).unwrap();
        assert_eq!(summary.subject_cn.as_deref(), Some("Test Signer"));
        assert_eq!(summary.issuer_cn.as_deref(), Some("Test Signer"));
        assert_eq!(summary.serial, "0123");
        assert!(summary.check_validity(Utc::now()).is_none());
        assert_eq!(
            summary.check_validity(summary.not_after + Duration::days(1)),
            Some(ValidityError::CertificateExpired)
        );
        assert_eq!(
            summary.check_validity(summary.not_before - Duration::days(1)),
            Some(ValidityError::CertificateNotValidYet)
        );
    }

    #[test]
    fn test_public_key_matches_private_key() {
        let public = rsa_public_key(test_support::certificate()).unwrap();
        assert_eq!(public, test_support::key().to_public_key());
    }

    #[test]
    fn test_decode_chain_accepts_both_alphabets() {
        let der = test_support::certificate();
        let text = format!("{};{}", STANDARD.encode(der), URL_SAFE_NO_PAD.encode(der));
        let chain = decode_chain(&text).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].as_slice(), der);
        assert!(decode_chain("").is_err());
        assert!(decode_chain("AAAA").is_err());
    }
}
