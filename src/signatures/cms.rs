//! CMS SignedData envelopes for PDF signatures.
//!
//! The envelope is detached: it never carries the document bytes, only the
//! signed attributes (content type, message digest, signing certificate,
//! optional policy and content hints) and the RSA signature over them.
//!
//! Building is split so the two halves can run on different machines:
//! [`signed_attributes`] produces the DER that has to be signed and
//! [`assemble`] combines it with the PKCS#1 signature produced elsewhere.

use super::params::{PadesParams, SignaturePolicy};
use super::types::{DigestAlgorithm, SigningCredentials};
use crate::error::{Error, Result};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{Ia5String, OctetString, SetOfVec};
use der::oid::ObjectIdentifier;
use der::{Any, Decode, Encode, Sequence, SliceReader};
use x509_cert::attr::Attribute;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

pub const OID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
/// eContentType of PDF signatures.
pub const OID_PDF_CONTENT: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.826.0.1089.1.5");
pub const OID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
pub const OID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
pub const OID_SIGNING_CERTIFICATE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.12");
pub const OID_SIGNING_CERTIFICATE_V2: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");
pub const OID_SIGNATURE_POLICY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.15");
pub const OID_SPURI: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.5.1");
pub const OID_CONTENT_HINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.4");
pub const OID_TIMESTAMP_TOKEN: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct IssuerSerial {
    issuer: Vec<GeneralName>,
    serial_number: SerialNumber,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct EssCertId {
    cert_hash: OctetString,
    issuer_serial: IssuerSerial,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct EssCertIdV2 {
    /// Absent means SHA-256
    hash_algorithm: Option<AlgorithmIdentifierOwned>,
    cert_hash: OctetString,
    issuer_serial: IssuerSerial,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SigningCertificate {
    certs: Vec<EssCertId>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SigningCertificateV2 {
    certs: Vec<EssCertIdV2>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct OtherHashAlgAndValue {
    hash_algorithm: AlgorithmIdentifierOwned,
    hash_value: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SigPolicyQualifierInfo {
    qualifier_id: ObjectIdentifier,
    qualifier: Any,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SignaturePolicyId {
    policy_id: ObjectIdentifier,
    policy_hash: OtherHashAlgAndValue,
    qualifiers: Option<Vec<SigPolicyQualifierInfo>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct ContentHints {
    description: Option<String>,
    content_type: ObjectIdentifier,
}

/// What goes into the signed attributes besides digest and certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct CmsOptions {
    pub digest_algorithm: DigestAlgorithm,
    pub signing_certificate_v2: bool,
    pub policy: Option<SignaturePolicy>,
    pub content_description: Option<String>,
}

impl CmsOptions {
    /// Defaults for `alg`: V1 signing certificate for SHA-1, V2 otherwise.
    pub fn new(digest_algorithm: DigestAlgorithm) -> Self {
        Self {
            digest_algorithm,
            signing_certificate_v2: digest_algorithm != DigestAlgorithm::Sha1,
            policy: None,
            content_description: None,
        }
    }

    pub fn from_params(digest_algorithm: DigestAlgorithm, params: &PadesParams) -> Self {
        Self {
            signing_certificate_v2: params
                .signing_certificate_v2
                .unwrap_or(digest_algorithm != DigestAlgorithm::Sha1),
            policy: params.policy.clone(),
            content_description: Some(params.content_description.clone()),
            ..Self::new(digest_algorithm)
        }
    }
}

fn algorithm(oid: ObjectIdentifier) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned { oid, parameters: None }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

fn issuer_serial(cert: &Certificate) -> IssuerSerial {
    IssuerSerial {
        issuer: vec![GeneralName::DirectoryName(cert.tbs_certificate.issuer.clone())],
        serial_number: cert.tbs_certificate.serial_number.clone(),
    }
}

fn signing_certificate_attribute(cert_der: &[u8], cert: &Certificate, options: &CmsOptions) -> Result<Attribute> {
    if !options.signing_certificate_v2 {
        let value = SigningCertificate {
            certs: vec![EssCertId {
                cert_hash: OctetString::new(DigestAlgorithm::Sha1.digest(cert_der))?,
                issuer_serial: issuer_serial(cert),
            }],
        };
        return attribute(OID_SIGNING_CERTIFICATE, Any::encode_from(&value)?);
    }
    let alg = match options.digest_algorithm {
        DigestAlgorithm::Sha1 => DigestAlgorithm::Sha256,
        other => other,
    };
    let value = SigningCertificateV2 {
        certs: vec![EssCertIdV2 {
            hash_algorithm: (alg != DigestAlgorithm::Sha256).then(|| algorithm(alg.oid())),
            cert_hash: OctetString::new(alg.digest(cert_der))?,
            issuer_serial: issuer_serial(cert),
        }],
    };
    attribute(OID_SIGNING_CERTIFICATE_V2, Any::encode_from(&value)?)
}

fn policy_attribute(policy: &SignaturePolicy) -> Result<Attribute> {
    let policy_id: ObjectIdentifier = policy
        .identifier
        .parse()
        .map_err(|_| Error::parameter("policyIdentifier", format!("'{}' is not an OID", policy.identifier)))?;
    let qualifiers = match &policy.qualifier {
        Some(uri) => Some(vec![SigPolicyQualifierInfo {
            qualifier_id: OID_SPURI,
            qualifier: Any::encode_from(&Ia5String::new(uri)?)?,
        }]),
        None => None,
    };
    let value = SignaturePolicyId {
        policy_id,
        policy_hash: OtherHashAlgAndValue {
            hash_algorithm: algorithm(policy.hash_algorithm.oid()),
            hash_value: OctetString::new(policy.hash.clone())?,
        },
        qualifiers,
    };
    attribute(OID_SIGNATURE_POLICY, Any::encode_from(&value)?)
}

/// DER `SET OF Attribute` to be signed for a document digest.
pub fn signed_attributes(document_digest: &[u8], chain: &[Vec<u8>], options: &CmsOptions) -> Result<Vec<u8>> {
    let cert_der = chain
        .first()
        .ok_or_else(|| Error::InvalidCertificate("empty certificate chain".to_string()))?;
    let cert = Certificate::from_der(cert_der)?;

    let mut attributes = vec![
        attribute(OID_CONTENT_TYPE, Any::encode_from(&OID_PDF_CONTENT)?)?,
        attribute(OID_MESSAGE_DIGEST, Any::encode_from(&OctetString::new(document_digest.to_vec())?)?)?,
        signing_certificate_attribute(cert_der, &cert, options)?,
    ];
    if let Some(policy) = &options.policy {
        attributes.push(policy_attribute(policy)?);
    }
    if let Some(description) = &options.content_description {
        let hints = ContentHints {
            description: Some(description.clone()),
            content_type: OID_PDF_CONTENT,
        };
        attributes.push(attribute(OID_CONTENT_HINTS, Any::encode_from(&hints)?)?);
    }
    Ok(SetOfVec::try_from(attributes)?.to_der()?)
}

/// PKCS#1 v1.5 signature of the signed attributes.
pub fn sign_attributes(data_to_sign: &[u8], key: &rsa::RsaPrivateKey, alg: DigestAlgorithm) -> Result<Vec<u8>> {
    key.sign(alg.pkcs1v15(), &alg.digest(data_to_sign))
        .map_err(|e| Error::Crypto(format!("RSA signing failed: {}", e)))
}

/// Whether `pkcs1` is a valid signature of `data_to_sign` by the certificate's key.
pub fn verify_attributes(data_to_sign: &[u8], pkcs1: &[u8], cert_der: &[u8], alg: DigestAlgorithm) -> Result<bool> {
    let public_key = super::certificate::rsa_public_key(cert_der)?;
    Ok(public_key
        .verify(alg.pkcs1v15(), &alg.digest(data_to_sign), pkcs1)
        .is_ok())
}

/// Build the envelope from signed attributes and their PKCS#1 signature.
pub fn assemble(
    data_to_sign: &[u8],
    pkcs1: &[u8],
    chain: &[Vec<u8>],
    alg: DigestAlgorithm,
) -> Result<SignedDataEnvelope> {
    let certs = chain
        .iter()
        .map(|der| Certificate::from_der(der))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let signer = certs
        .first()
        .ok_or_else(|| Error::InvalidCertificate("empty certificate chain".to_string()))?;

    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: signer.tbs_certificate.issuer.clone(),
            serial_number: signer.tbs_certificate.serial_number.clone(),
        }),
        digest_alg: algorithm(alg.oid()),
        signed_attrs: Some(SetOfVec::<Attribute>::from_der(data_to_sign)?),
        signature_algorithm: AlgorithmIdentifierOwned {
            oid: alg.rsa_signature_oid(),
            parameters: Some(Any::null()),
        },
        signature: OctetString::new(pkcs1.to_vec())?,
        unsigned_attrs: None,
    };
    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![algorithm(alg.oid())])?,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: OID_PDF_CONTENT,
            econtent: None,
        },
        certificates: Some(CertificateSet(SetOfVec::try_from(
            certs.into_iter().map(CertificateChoices::Certificate).collect::<Vec<_>>(),
        )?)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
    };
    SignedDataEnvelope::from_signed_data(signed_data)
}

/// Standalone packaging with a local key.
pub fn package(document_digest: &[u8], credentials: &SigningCredentials, options: &CmsOptions) -> Result<SignedDataEnvelope> {
    let data_to_sign = signed_attributes(document_digest, &credentials.chain, options)?;
    let pkcs1 = sign_attributes(&data_to_sign, &credentials.private_key, options.digest_algorithm)?;
    assemble(&data_to_sign, &pkcs1, &credentials.chain, options.digest_algorithm)
}

/// DER-encoded CMS `ContentInfo` wrapping a SignedData.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedDataEnvelope {
    der: Vec<u8>,
    signed_data: SignedData,
}

impl SignedDataEnvelope {
    /// Wrap `signed_data` into a `ContentInfo`.
    pub fn from_signed_data(signed_data: SignedData) -> Result<Self> {
        let content_info = ContentInfo {
            content_type: OID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        };
        Ok(Self {
            der: content_info.to_der()?,
            signed_data,
        })
    }

    /// Parse an envelope, ignoring the zero padding of a `/Contents` value.
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(bytes)?;
        let content_info = ContentInfo::decode(&mut reader)?;
        if content_info.content_type != OID_SIGNED_DATA {
            return Err(Error::Crypto(format!(
                "expected SignedData, found content type {}",
                content_info.content_type
            )));
        }
        let signed_data: SignedData = content_info.content.decode_as()?;
        Ok(Self {
            der: content_info.to_der()?,
            signed_data,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.der
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.der
    }

    pub fn signed_data(&self) -> &SignedData {
        &self.signed_data
    }

    pub fn signer_info(&self) -> Result<&SignerInfo> {
        self.signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or_else(|| Error::Crypto("SignedData has no SignerInfo".to_string()))
    }

    /// The value the signer's RSA key produced.
    pub fn signature_value(&self) -> Result<&[u8]> {
        Ok(self.signer_info()?.signature.as_bytes())
    }

    /// DER certificates carried by the envelope.
    pub fn certificates(&self) -> Result<Vec<Vec<u8>>> {
        let Some(set) = &self.signed_data.certificates else {
            return Ok(Vec::new());
        };
        set.0
            .iter()
            .filter_map(|choice| match choice {
                CertificateChoices::Certificate(cert) => Some(cert.to_der().map_err(Error::from)),
                _ => None,
            })
            .collect()
    }

    /// DER of the certificate named by the signer identifier.
    pub fn signer_certificate(&self) -> Result<Vec<u8>> {
        let signer = self.signer_info()?;
        let Some(set) = &self.signed_data.certificates else {
            return Err(Error::InvalidCertificate("SignedData carries no certificates".to_string()));
        };
        let certs: Vec<&Certificate> = set
            .0
            .iter()
            .filter_map(|c| match c {
                CertificateChoices::Certificate(cert) => Some(cert),
                _ => None,
            })
            .collect();
        let matched = match &signer.sid {
            SignerIdentifier::IssuerAndSerialNumber(id) => certs.iter().find(|c| {
                c.tbs_certificate.issuer == id.issuer && c.tbs_certificate.serial_number == id.serial_number
            }),
            SignerIdentifier::SubjectKeyIdentifier(_) => certs.first(),
        };
        matched
            .ok_or_else(|| Error::InvalidCertificate("signer certificate not found in SignedData".to_string()))?
            .to_der()
            .map_err(Error::from)
    }

    /// First value of a signed attribute.
    pub fn signed_attribute(&self, oid: ObjectIdentifier) -> Result<Option<Any>> {
        let signer = self.signer_info()?;
        Ok(signer
            .signed_attrs
            .as_ref()
            .and_then(|attrs| attrs.iter().find(|a| a.oid == oid))
            .and_then(|a| a.values.iter().next().cloned()))
    }

    pub fn message_digest(&self) -> Result<Option<Vec<u8>>> {
        match self.signed_attribute(OID_MESSAGE_DIGEST)? {
            Some(value) => Ok(Some(value.decode_as::<OctetString>()?.as_bytes().to_vec())),
            None => Ok(None),
        }
    }

    /// DER of the signed attributes, or `None` when the signature is over the
    /// content digest directly.
    pub fn signed_attributes_der(&self) -> Result<Option<Vec<u8>>> {
        match &self.signer_info()?.signed_attrs {
            Some(attrs) => Ok(Some(attrs.to_der()?)),
            None => Ok(None),
        }
    }

    pub fn has_unsigned_attribute(&self, oid: ObjectIdentifier) -> bool {
        self.signer_info()
            .ok()
            .and_then(|s| s.unsigned_attrs.as_ref())
            .is_some_and(|attrs| attrs.iter().any(|a| a.oid == oid))
    }

    /// A new envelope with `value` added to the first SignerInfo's unsigned attributes.
    pub fn with_unsigned_attribute(&self, oid: ObjectIdentifier, value: Any) -> Result<Self> {
        let mut signed_data = self.signed_data.clone();
        let mut infos: Vec<SignerInfo> = signed_data.signer_infos.0.iter().cloned().collect();
        let first = infos
            .first_mut()
            .ok_or_else(|| Error::Crypto("SignedData has no SignerInfo".to_string()))?;
        let mut attrs: Vec<Attribute> = first
            .unsigned_attrs
            .as_ref()
            .map(|a| a.iter().cloned().collect())
            .unwrap_or_default();
        attrs.push(attribute(oid, value)?);
        first.unsigned_attrs = Some(SetOfVec::try_from(attrs)?);
        signed_data.signer_infos = SignerInfos(SetOfVec::try_from(infos)?);
        Self::from_signed_data(signed_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn options(alg: DigestAlgorithm) -> CmsOptions {
        CmsOptions {
            content_description: Some("Documento en formato PDF".into()),
            ..CmsOptions::new(alg)
        }
    }

    fn attribute_oids(der: &[u8]) -> Vec<ObjectIdentifier> {
        SetOfVec::<Attribute>::from_der(der).unwrap().iter().map(|a| a.oid).collect()
    }

    #[test]
    fn test_signing_certificate_version_follows_digest() {
        let chain = vec![test_support::certificate().to_vec()];
        let v1 = signed_attributes(&[0; 20], &chain, &options(DigestAlgorithm::Sha1)).unwrap();
        assert!(attribute_oids(&v1).contains(&OID_SIGNING_CERTIFICATE));
        assert!(!attribute_oids(&v1).contains(&OID_SIGNING_CERTIFICATE_V2));

        let v2 = signed_attributes(&[0; 32], &chain, &options(DigestAlgorithm::Sha256)).unwrap();
        assert!(attribute_oids(&v2).contains(&OID_SIGNING_CERTIFICATE_V2));

        let params = PadesParams {
            signing_certificate_v2: Some(true),
            ..PadesParams::default()
        };
        let forced = CmsOptions::from_params(DigestAlgorithm::Sha1, &params);
        assert!(forced.signing_certificate_v2);
        let forced = signed_attributes(&[0; 20], &chain, &forced).unwrap();
        assert!(attribute_oids(&forced).contains(&OID_SIGNING_CERTIFICATE_V2));
    }

    #[test]
    fn test_attributes_have_no_signing_time() {
        let chain = vec![test_support::certificate().to_vec()];
        let der = signed_attributes(&[7; 32], &chain, &options(DigestAlgorithm::Sha256)).unwrap();
        let oids = attribute_oids(&der);
        assert!(oids.contains(&OID_CONTENT_TYPE));
        assert!(oids.contains(&OID_MESSAGE_DIGEST));
        assert!(oids.contains(&OID_CONTENT_HINTS));
        assert!(!oids.contains(&ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5")));
        assert_eq!(der[0], 0x31);
    }

    #[test]
    fn test_policy_attribute() {
        let chain = vec![test_support::certificate().to_vec()];
        let mut opts = options(DigestAlgorithm::Sha256);
        opts.policy = Some(SignaturePolicy {
            identifier: "2.16.724.1.3.1.1.2.1.9".into(),
            hash: vec![1; 20],
            hash_algorithm: DigestAlgorithm::Sha1,
            qualifier: Some("https://example.com/policy.pdf".into()),
        });
        let der = signed_attributes(&[0; 32], &chain, &opts).unwrap();
        assert!(attribute_oids(&der).contains(&OID_SIGNATURE_POLICY));

        opts.policy.as_mut().unwrap().identifier = "not-an-oid".into();
        assert!(matches!(
            signed_attributes(&[0; 32], &chain, &opts),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_split_packaging_verifies() {
        let credentials = test_support::credentials();
        let alg = DigestAlgorithm::Sha256;
        let digest = alg.digest(b"document bytes");
        let data_to_sign = signed_attributes(&digest, &credentials.chain, &options(alg)).unwrap();
        let pkcs1 = sign_attributes(&data_to_sign, &credentials.private_key, alg).unwrap();
        assert!(verify_attributes(&data_to_sign, &pkcs1, &credentials.chain[0], alg).unwrap());
        assert!(!verify_attributes(b"other", &pkcs1, &credentials.chain[0], alg).unwrap());

        let envelope = assemble(&data_to_sign, &pkcs1, &credentials.chain, alg).unwrap();
        assert_eq!(envelope.signature_value().unwrap(), pkcs1.as_slice());
        assert_eq!(envelope.message_digest().unwrap(), Some(digest));
        assert_eq!(envelope.signed_attributes_der().unwrap(), Some(data_to_sign));
        assert_eq!(envelope.signer_certificate().unwrap(), credentials.chain[0]);
        assert!(envelope.signed_data().encap_content_info.econtent.is_none());
    }

    #[test]
    fn test_envelope_parses_with_padding_and_is_immutable() {
        let credentials = test_support::credentials();
        let envelope = package(&[3; 32], &credentials, &CmsOptions::new(DigestAlgorithm::Sha256)).unwrap();
        let mut padded = envelope.as_bytes().to_vec();
        padded.extend_from_slice(&[0; 64]);
        let parsed = SignedDataEnvelope::from_der(&padded).unwrap();
        assert_eq!(parsed.as_bytes(), envelope.as_bytes());

        let stamped = parsed
            .with_unsigned_attribute(OID_TIMESTAMP_TOKEN, Any::encode_from(&OctetString::new(vec![1, 2]).unwrap()).unwrap())
            .unwrap();
        assert!(stamped.has_unsigned_attribute(OID_TIMESTAMP_TOKEN));
        assert!(!parsed.has_unsigned_attribute(OID_TIMESTAMP_TOKEN));
        assert_eq!(stamped.signature_value().unwrap(), parsed.signature_value().unwrap());
    }
}
