//! Digital signature types and data structures.

use crate::error::{Error, Result};
use der::oid::ObjectIdentifier;
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

pub const OID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
pub const OID_SHA224: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.4");
pub const OID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
pub const OID_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
pub const OID_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigestAlgorithm {
    /// SHA-1 (deprecated, but still common in legacy PDFs)
    Sha1,
    Sha224,
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => OID_SHA1,
            DigestAlgorithm::Sha224 => OID_SHA224,
            DigestAlgorithm::Sha256 => OID_SHA256,
            DigestAlgorithm::Sha384 => OID_SHA384,
            DigestAlgorithm::Sha512 => OID_SHA512,
        }
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha224 => "SHA-224",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Signature algorithm name as used on the wire, e.g. `SHA256withRSA`.
    pub fn signature_algorithm(&self) -> String {
        format!("{}withRSA", self.name().replace('-', ""))
    }

    /// Strict lookup: only digest algorithm identifiers are accepted.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [Self::Sha1, Self::Sha224, Self::Sha256, Self::Sha384, Self::Sha512]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
    }

    /// Lenient lookup that also understands `shaXWithRSAEncryption`
    /// identifiers written where a digest identifier belongs.
    pub fn infer_from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Self::from_oid(oid).or_else(|| match oid.to_string().as_str() {
            "1.2.840.113549.1.1.5" => Some(Self::Sha1),
            "1.2.840.113549.1.1.14" => Some(Self::Sha224),
            "1.2.840.113549.1.1.11" => Some(Self::Sha256),
            "1.2.840.113549.1.1.12" => Some(Self::Sha384),
            "1.2.840.113549.1.1.13" => Some(Self::Sha512),
            _ => None,
        })
    }

    /// Parse a digest name such as `SHA-256`, `SHA256` or `sha1`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" | "SHA" => Some(Self::Sha1),
            "SHA224" => Some(Self::Sha224),
            "SHA256" => Some(Self::Sha256),
            "SHA384" => Some(Self::Sha384),
            "SHA512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Parse a signature algorithm name. Only RSA with SHA-1/256/384/512 is
    /// accepted for signing.
    pub fn from_signature_algorithm(name: &str) -> Result<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let digest = upper
            .strip_suffix("WITHRSA")
            .and_then(Self::from_name)
            .filter(|alg| *alg != Self::Sha224);
        digest.ok_or_else(|| Error::parameter("algorithm", format!("unsupported signature algorithm '{}'", name)))
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha224 => Sha224::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// `shaXWithRSAEncryption` identifier for this digest.
    pub fn rsa_signature_oid(&self) -> ObjectIdentifier {
        let oid = match self {
            DigestAlgorithm::Sha1 => "1.2.840.113549.1.1.5",
            DigestAlgorithm::Sha224 => "1.2.840.113549.1.1.14",
            DigestAlgorithm::Sha256 => "1.2.840.113549.1.1.11",
            DigestAlgorithm::Sha384 => "1.2.840.113549.1.1.12",
            DigestAlgorithm::Sha512 => "1.2.840.113549.1.1.13",
        };
        ObjectIdentifier::new_unwrap(oid)
    }

    /// PKCS#1 v1.5 scheme carrying this digest's DigestInfo prefix.
    pub fn pkcs1v15(&self) -> rsa::Pkcs1v15Sign {
        match self {
            DigestAlgorithm::Sha1 => rsa::Pkcs1v15Sign::new::<Sha1>(),
            DigestAlgorithm::Sha224 => rsa::Pkcs1v15Sign::new::<Sha224>(),
            DigestAlgorithm::Sha256 => rsa::Pkcs1v15Sign::new::<Sha256>(),
            DigestAlgorithm::Sha384 => rsa::Pkcs1v15Sign::new::<Sha384>(),
            DigestAlgorithm::Sha512 => rsa::Pkcs1v15Sign::new::<Sha512>(),
        }
    }
}

/// Signature sub-filter type (signature format).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    Pkcs7Detached,
    /// adbe.pkcs7.sha1 - PKCS#7 with SHA-1 digest
    Pkcs7Sha1,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    CadesDetached,
    /// ETSI.RFC3161 - document timestamp
    Rfc3161,
    /// Anything else, kept verbatim
    Other(String),
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::Pkcs7Sha1 => "adbe.pkcs7.sha1",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
            SignatureSubFilter::Rfc3161 => "ETSI.RFC3161",
            SignatureSubFilter::Other(name) => name,
        }
    }

    pub fn from_pdf_name(name: &str) -> Self {
        match name {
            "adbe.pkcs7.detached" => SignatureSubFilter::Pkcs7Detached,
            "adbe.pkcs7.sha1" => SignatureSubFilter::Pkcs7Sha1,
            "ETSI.CAdES.detached" => SignatureSubFilter::CadesDetached,
            "ETSI.RFC3161" => SignatureSubFilter::Rfc3161,
            other => SignatureSubFilter::Other(other.to_string()),
        }
    }

    /// Document timestamps carry no content signature to match.
    pub fn is_timestamp(&self) -> bool {
        match self {
            SignatureSubFilter::Rfc3161 => true,
            SignatureSubFilter::Other(name) => name == "DocTimeStamp",
            _ => false,
        }
    }
}

/// Signer key and certificate chain, leaf first.
#[derive(Clone)]
pub struct SigningCredentials {
    pub private_key: rsa::RsaPrivateKey,
    /// DER-encoded certificates, signer first
    pub chain: Vec<Vec<u8>>,
}

impl SigningCredentials {
    pub fn new(private_key: rsa::RsaPrivateKey, chain: Vec<Vec<u8>>) -> Self {
        Self { private_key, chain }
    }

    /// Load a PKCS#8 DER private key.
    pub fn from_pkcs8_der(key: &[u8], chain: Vec<Vec<u8>>) -> Result<Self> {
        use pkcs8::DecodePrivateKey;
        let private_key =
            rsa::RsaPrivateKey::from_pkcs8_der(key).map_err(|e| Error::Crypto(format!("bad PKCS#8 key: {}", e)))?;
        Ok(Self { private_key, chain })
    }

    pub fn certificate(&self) -> Result<&[u8]> {
        self.chain
            .first()
            .map(Vec::as_slice)
            .ok_or_else(|| Error::InvalidCertificate("empty certificate chain".to_string()))
    }
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("private_key", &"[REDACTED]")
            .field("chain", &format!("{} certificates", self.chain.len()))
            .finish()
    }
}

/// Overall verdict of one finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidityDetail {
    Ok,
    Ko,
    PendingConfirmation,
}

/// Kind of validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidityError {
    NoSign,
    AlgorithmNotSupported,
    NoMatchData,
    CorruptedSign,
    CertificateExpired,
    CertificateNotValidYet,
    ModifiedForm,
    SuspectedShadowAttack,
}

impl std::fmt::Display for ValidityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValidityError::NoSign => "NO_SIGN",
            ValidityError::AlgorithmNotSupported => "ALGORITHM_NOT_SUPPORTED",
            ValidityError::NoMatchData => "NO_MATCH_DATA",
            ValidityError::CorruptedSign => "CORRUPTED_SIGN",
            ValidityError::CertificateExpired => "CERTIFICATE_EXPIRED",
            ValidityError::CertificateNotValidYet => "CERTIFICATE_NOT_VALID_YET",
            ValidityError::ModifiedForm => "MODIFIED_FORM",
            ValidityError::SuspectedShadowAttack => "SUSPECTED_SHADOW_ATTACK",
        };
        f.write_str(name)
    }
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignValidity {
    pub detail: ValidityDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ValidityError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl SignValidity {
    pub fn ok() -> Self {
        Self {
            detail: ValidityDetail::Ok,
            error: None,
            cause: None,
        }
    }

    pub fn ko(error: ValidityError, cause: impl Into<Option<String>>) -> Self {
        Self {
            detail: ValidityDetail::Ko,
            error: Some(error),
            cause: cause.into(),
        }
    }

    pub fn pending(error: ValidityError, cause: impl Into<Option<String>>) -> Self {
        Self {
            detail: ValidityDetail::PendingConfirmation,
            error: Some(error),
            cause: cause.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.detail == ValidityDetail::Ok
    }
}

impl std::fmt::Display for SignValidity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.detail {
            ValidityDetail::Ok => f.write_str("OK")?,
            ValidityDetail::Ko => f.write_str("KO")?,
            ValidityDetail::PendingConfirmation => f.write_str("PENDING_CONFIRMATION")?,
        }
        if let Some(error) = self.error {
            write!(f, " {}", error)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_algorithm_names() {
        assert_eq!(DigestAlgorithm::Sha256.name(), "SHA-256");
        assert_eq!(DigestAlgorithm::Sha1.signature_algorithm(), "SHA1withRSA");
        assert_eq!(DigestAlgorithm::from_name("sha-384"), Some(DigestAlgorithm::Sha384));
    }

    #[test]
    fn test_signature_algorithm_parsing() {
        assert_eq!(
            DigestAlgorithm::from_signature_algorithm("SHA512withRSA").unwrap(),
            DigestAlgorithm::Sha512
        );
        assert!(DigestAlgorithm::from_signature_algorithm("SHA256withECDSA").is_err());
        assert!(DigestAlgorithm::from_signature_algorithm("SHA224withRSA").is_err());
    }

    #[test]
    fn test_oid_lookup_strict_and_lenient() {
        let sha256_with_rsa = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
        assert_eq!(DigestAlgorithm::from_oid(&OID_SHA256), Some(DigestAlgorithm::Sha256));
        assert_eq!(DigestAlgorithm::from_oid(&sha256_with_rsa), None);
        assert_eq!(DigestAlgorithm::infer_from_oid(&sha256_with_rsa), Some(DigestAlgorithm::Sha256));
    }

    #[test]
    fn test_sub_filter_names() {
        assert_eq!(SignatureSubFilter::default().as_pdf_name(), "adbe.pkcs7.detached");
        assert_eq!(SignatureSubFilter::from_pdf_name("ETSI.RFC3161"), SignatureSubFilter::Rfc3161);
        let other = SignatureSubFilter::from_pdf_name("x.custom");
        assert_eq!(other.as_pdf_name(), "x.custom");
        assert!(SignatureSubFilter::from_pdf_name("DocTimeStamp").is_timestamp());
    }

    #[test]
    fn test_validity_display() {
        assert_eq!(SignValidity::ok().to_string(), "OK");
        let ko = SignValidity::ko(ValidityError::NoSign, None);
        assert_eq!(ko.to_string(), "KO NO_SIGN");
        let json = serde_json::to_string(&ko).unwrap();
        assert_eq!(json, r#"{"detail":"KO","error":"NO_SIGN"}"#);
    }
}
