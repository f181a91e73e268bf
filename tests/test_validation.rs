//! Integration tests for signature validation and tamper detection.

mod common;

use ::cms::signed_data::SignerInfos;
use der::asn1::SetOfVec;
use der::oid::ObjectIdentifier;
use pades_triphase::error::Confirmation;
use pades_triphase::object::{Object, ObjectRef};
use pades_triphase::signatures::{
    builder, cms, parse_properties, validate, CmsOptions, DigestAlgorithm, PadesParams, PadesSigner,
    SignValidity, SignedDataEnvelope, Signs, ValidationParams, ValidityError,
};
use pades_triphase::writer::IncrementalUpdate;
use pades_triphase::{Error, PdfDocument};

const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

fn sign(document: &[u8]) -> Vec<u8> {
    PadesSigner::new(common::credentials(), DigestAlgorithm::Sha256)
        .sign(document, &PadesParams::default())
        .unwrap()
}

fn validation(text: &str) -> ValidationParams {
    ValidationParams::from_extra_params(&parse_properties(text))
}

fn append_revision(data: &[u8], edit: impl FnOnce(&mut IncrementalUpdate<'_>)) -> Vec<u8> {
    let doc = PdfDocument::open(data.to_vec()).unwrap();
    let mut update = IncrementalUpdate::new(&doc);
    edit(&mut update);
    update.write().unwrap().bytes
}

fn errors(findings: &[SignValidity]) -> Vec<ValidityError> {
    findings.iter().filter_map(|f| f.error).collect()
}

/// Sign with an envelope whose signer declares sha256WithRSAEncryption
/// as its digest algorithm.
fn sign_with_signature_oid(document: &[u8]) -> Vec<u8> {
    let credentials = common::credentials();
    let material = builder::reserve_signature(document, &PadesParams::default(), credentials.certificate().unwrap()).unwrap();
    let digest = builder::compute_digest(&material, DigestAlgorithm::Sha256).unwrap();
    let envelope = cms::package(&digest, &credentials, &CmsOptions::new(DigestAlgorithm::Sha256)).unwrap();

    let mut signed_data = envelope.signed_data().clone();
    let mut infos: Vec<_> = signed_data.signer_infos.0.iter().cloned().collect();
    infos[0].digest_alg.oid = SHA256_WITH_RSA;
    signed_data.signer_infos = SignerInfos(SetOfVec::try_from(infos).unwrap());
    let envelope = SignedDataEnvelope::from_signed_data(signed_data).unwrap();
    builder::embed(&material, &envelope).unwrap()
}

mod algorithm_tests {
    use super::*;

    #[test]
    fn test_unsupported_algorithm_reported_once() {
        let mut document = common::pdf(1, false);
        for _ in 0..3 {
            document = sign_with_signature_oid(&document);
        }
        assert_eq!(PdfDocument::open(document.clone()).unwrap().signatures().len(), 3);

        let findings = validate(&document, &ValidationParams::default()).unwrap();
        assert_eq!(errors(&findings), vec![ValidityError::AlgorithmNotSupported]);
        assert!(!findings[0].is_ok());
    }

    #[test]
    fn test_unsigned_document() {
        let findings = validate(&common::pdf(1, false), &ValidationParams::default()).unwrap();
        assert_eq!(errors(&findings), vec![ValidityError::NoSign]);
        let findings = validate(b"not a pdf", &ValidationParams::default()).unwrap();
        assert_eq!(errors(&findings), vec![ValidityError::NoSign]);
    }
}

mod form_tests {
    use super::*;

    fn tampered() -> Vec<u8> {
        let signed = sign(&common::pdf(1, true));
        append_revision(&signed, |update| {
            let r = ObjectRef::new(3, 0);
            let mut field = update.get(r).and_then(Object::as_dict).cloned().unwrap();
            field.insert("V".into(), Object::String(b"rejected".to_vec()));
            update.put(r, Object::Dictionary(field));
        })
    }

    #[test]
    fn test_modified_form_detected() {
        let findings = validate(&tampered(), &ValidationParams::default()).unwrap();
        assert!(errors(&findings).contains(&ValidityError::ModifiedForm), "{:?}", findings);
        let finding = findings
            .iter()
            .find(|f| f.error == Some(ValidityError::ModifiedForm))
            .unwrap();
        assert_eq!(finding.cause.as_deref(), Some("comment modified"));
    }

    #[test]
    fn test_modified_form_allowed() {
        let findings = validate(&tampered(), &validation("allowSignModifiedForm=true")).unwrap();
        assert_eq!(findings, vec![SignValidity::ok()]);
    }

    #[test]
    fn test_relaxed_mode_asks_for_confirmation() {
        let params = ValidationParams::default().relaxed(true);
        assert!(matches!(
            validate(&tampered(), &params),
            Err(Error::NeedsConfirmation(Confirmation::ModifiedForm))
        ));
    }

    #[test]
    fn test_signed_untouched_form() {
        let signed = sign(&common::pdf(1, true));
        assert_eq!(validate(&signed, &ValidationParams::default()).unwrap(), vec![SignValidity::ok()]);
    }
}

mod shadow_tests {
    use super::*;

    fn shadowed() -> Vec<u8> {
        let signed = sign(&common::pdf(2, false));
        append_revision(&signed, |update| {
            update.put(
                ObjectRef::new(5, 0),
                Object::Stream {
                    dict: Default::default(),
                    data: b"BT /F1 12 Tf 72 720 Td (Paid) Tj ET".to_vec().into(),
                },
            );
        })
    }

    #[test]
    fn test_shadow_attack_detected() {
        let findings = validate(&shadowed(), &ValidationParams::default()).unwrap();
        assert_eq!(errors(&findings), vec![ValidityError::SuspectedShadowAttack]);
        assert_eq!(findings[0].cause.as_deref(), Some("content of page 1 changed"));
    }

    #[test]
    fn test_shadow_attack_allowed() {
        let findings = validate(&shadowed(), &validation("allowShadowAttack=true")).unwrap();
        assert_eq!(findings, vec![SignValidity::ok()]);
    }

    #[test]
    fn test_relaxed_mode_asks_for_confirmation() {
        let params = ValidationParams::default().relaxed(true);
        assert!(matches!(
            validate(&shadowed(), &params),
            Err(Error::NeedsConfirmation(Confirmation::ShadowAttack))
        ));
    }
}

mod certificate_tests {
    use super::*;
    use pades_triphase::signatures::SigningCredentials;

    fn signed_with_expired_certificate() -> Vec<u8> {
        let now = common::now();
        let certificate = common::certificate_valid_between(now - 60 * common::DAY, now - common::DAY);
        let credentials = SigningCredentials::new(common::key().clone(), vec![certificate]);
        PadesSigner::new(credentials, DigestAlgorithm::Sha256)
            .sign(&common::pdf(1, false), &PadesParams::default())
            .unwrap()
    }

    #[test]
    fn test_expired_certificate() {
        let findings = validate(&signed_with_expired_certificate(), &ValidationParams::default()).unwrap();
        assert_eq!(errors(&findings), vec![ValidityError::CertificateExpired]);
    }

    #[test]
    fn test_certificate_check_disabled() {
        let findings =
            validate(&signed_with_expired_certificate(), &validation("checkCertificates=false")).unwrap();
        assert_eq!(findings, vec![SignValidity::ok()]);
    }
}

mod byte_range_tests {
    use super::*;

    /// Overwrite the `/ByteRange` array in place, without moving any object.
    fn rewrite_byte_range(document: &mut [u8], values: &str) {
        let key = b"/ByteRange [";
        let start = document.windows(key.len()).position(|w| w == key).unwrap() + key.len();
        let end = start + document[start..].iter().position(|&b| b == b']').unwrap();
        assert!(values.len() <= end - start);
        let padded = format!("{:width$}", values, width = end - start);
        document[start..end].copy_from_slice(padded.as_bytes());
    }

    #[test]
    fn test_overflowing_byte_range_is_corrupted() {
        let mut signed = sign(&common::pdf(1, false));
        rewrite_byte_range(&mut signed, "0 1 9223372036854775807 1");
        assert_eq!(PdfDocument::open(signed.clone()).unwrap().signatures().len(), 1);

        let findings = validate(&signed, &ValidationParams::default()).unwrap();
        assert_eq!(errors(&findings), vec![ValidityError::CorruptedSign]);
    }

    #[test]
    fn test_byte_range_past_the_end_is_corrupted() {
        let mut signed = sign(&common::pdf(1, false));
        rewrite_byte_range(&mut signed, "0 1 2 99999999");
        let findings = validate(&signed, &ValidationParams::default()).unwrap();
        assert_eq!(errors(&findings), vec![ValidityError::CorruptedSign]);
    }
}
