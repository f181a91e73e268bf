//! PDF signature validation.
//!
//! Every signature is checked cryptographically and for certificate validity,
//! then the document as a whole is checked for form changes and shadow
//! attacks appended after signing. Findings are reported once per kind.

use super::byterange::ByteRangeCalculator;
use super::certificate::{self, CertificateSummary};
use super::cms::{self, SignedDataEnvelope};
use super::params::ValidationParams;
use super::tamper;
use super::traits::Validates;
use super::types::{DigestAlgorithm, SignValidity, SignatureSubFilter, ValidityError};
use crate::document::{PdfDocument, SignatureEntry};
use crate::error::{Confirmation, Error, Result};
use chrono::{DateTime, Utc};

/// Findings with at most one entry per kind.
#[derive(Debug, Default)]
struct Findings(Vec<SignValidity>);

impl Findings {
    fn push(&mut self, finding: SignValidity) {
        if !self.0.iter().any(|f| f.error == finding.error) {
            self.0.push(finding);
        }
    }

    fn into_result(self) -> Vec<SignValidity> {
        if self.0.is_empty() {
            vec![SignValidity::ok()]
        } else {
            self.0
        }
    }
}

fn corrupted(cause: impl std::fmt::Display) -> SignValidity {
    SignValidity::ko(ValidityError::CorruptedSign, cause.to_string())
}

/// Whether the envelope signs exactly the bytes named by the byte range.
fn content_matches(doc: &PdfDocument, sig: &SignatureEntry, envelope: &SignedDataEnvelope, alg: DigestAlgorithm) -> Result<bool> {
    ByteRangeCalculator::validate_byte_range(&sig.byte_range, doc.data().len())?;
    let digest = alg.digest(&ByteRangeCalculator::extract_signed_bytes(doc.data(), &sig.byte_range)?);
    let cert = envelope.signer_certificate()?;
    let signature = envelope.signature_value()?;
    match envelope.signed_attributes_der()? {
        Some(attributes) => {
            let declared = envelope
                .message_digest()?
                .ok_or_else(|| Error::Crypto("signed attributes lack a message digest".to_string()))?;
            if declared != digest {
                log::debug!("Message digest of '{}' does not match its byte range", sig.field_name);
                return Ok(false);
            }
            cms::verify_attributes(&attributes, signature, &cert, alg)
        },
        None => {
            let key = certificate::rsa_public_key(&cert)?;
            Ok(key.verify(alg.pkcs1v15(), &digest, signature).is_ok())
        },
    }
}

/// Findings for one signature, without cross-signature deduplication.
pub fn check_signature(doc: &PdfDocument, sig: &SignatureEntry, check_certificates: bool, now: DateTime<Utc>) -> Vec<SignValidity> {
    let mut findings = Vec::new();
    let envelope = match SignedDataEnvelope::from_der(&sig.contents) {
        Ok(envelope) => envelope,
        Err(e) => {
            log::warn!("Unreadable signature in field '{}': {}", sig.field_name, e);
            findings.push(corrupted(e));
            return findings;
        },
    };
    let declared = match envelope.signer_info() {
        Ok(info) => info.digest_alg.oid,
        Err(e) => {
            findings.push(corrupted(e));
            return findings;
        },
    };
    if DigestAlgorithm::from_oid(&declared).is_none() {
        log::warn!("Field '{}' declares {} as its digest algorithm", sig.field_name, declared);
        findings.push(SignValidity::ko(
            ValidityError::AlgorithmNotSupported,
            format!("{} is not a digest algorithm", declared),
        ));
    }

    if !SignatureSubFilter::from_pdf_name(&sig.sub_filter).is_timestamp() {
        let outcome = DigestAlgorithm::infer_from_oid(&declared)
            .ok_or_else(|| Error::Crypto(format!("unknown digest algorithm {}", declared)))
            .and_then(|alg| content_matches(doc, sig, &envelope, alg));
        match outcome {
            Ok(true) => {},
            Ok(false) => findings.push(SignValidity::ko(ValidityError::NoMatchData, None)),
            Err(e) => {
                log::warn!("Error validating signature '{}': {}", sig.field_name, e);
                findings.push(corrupted(e));
            },
        }
    }

    if check_certificates {
        match envelope.signer_certificate().and_then(|der| CertificateSummary::from_der(&der)) {
            Ok(summary) => {
                if let Some(error) = summary.check_validity(now) {
                    let cause = format!(
                        "certificate valid from {} to {}",
                        summary.not_before.to_rfc3339(),
                        summary.not_after.to_rfc3339()
                    );
                    findings.push(SignValidity::ko(error, cause));
                }
            },
            Err(e) => log::warn!("No signer certificate for '{}': {}", sig.field_name, e),
        }
    }
    findings
}

/// Validate every signature of `document`.
///
/// Returns `Err(NeedsConfirmation)` only in relaxed mode, when a tamper
/// check fires and the caller has not said how to treat it.
pub fn validate(document: &[u8], params: &ValidationParams) -> Result<Vec<SignValidity>> {
    let passwords: Vec<&[u8]> = params.passwords.iter().map(String::as_bytes).collect();
    let doc = match PdfDocument::open_with_passwords(document.to_vec(), &passwords) {
        Ok(doc) => doc,
        Err(e) => {
            log::info!("Cannot read the document as PDF: {}", e);
            return Ok(vec![SignValidity::ko(ValidityError::NoSign, None)]);
        },
    };
    let signatures = doc.signatures();
    if signatures.is_empty() {
        return Ok(vec![SignValidity::ko(ValidityError::NoSign, None)]);
    }

    let now = Utc::now();
    let mut findings = Findings::default();
    for sig in &signatures {
        for finding in check_signature(&doc, sig, params.check_certificates, now) {
            findings.push(finding);
        }
    }

    let final_revision = doc.revisions().len().saturating_sub(1);
    let allow_modified_form = params.allow_sign_modified_form == Some(true);
    if !allow_modified_form && final_revision > 0 {
        let first = signatures.iter().map(|s| s.revision).min().unwrap_or(0);
        match doc.open_revision(first) {
            Ok(signed) => {
                let changes = tamper::form_changes(&signed, &doc);
                if !changes.is_empty() {
                    if params.relaxed && params.allow_sign_modified_form.is_none() {
                        return Err(Error::NeedsConfirmation(Confirmation::ModifiedForm));
                    }
                    let cause = changes.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
                    findings.push(SignValidity::ko(ValidityError::ModifiedForm, cause));
                }
            },
            Err(e) => log::warn!("Cannot open revision {} for the form check: {}", first, e),
        }
    }

    let last = signatures.iter().map(|s| s.revision).max().unwrap_or(0);
    if !allow_modified_form && params.allow_shadow_attack != Some(true) && final_revision > 0 && last < final_revision {
        let signed = doc.open_revision(last)?;
        if let Some(finding) = tamper::shadow_attack(&signed, &doc, params.pages_to_check)? {
            if params.relaxed && params.allow_shadow_attack.is_none() {
                return Err(Error::NeedsConfirmation(Confirmation::ShadowAttack));
            }
            findings.push(SignValidity::ko(ValidityError::SuspectedShadowAttack, finding.cause));
        }
    }
    Ok(findings.into_result())
}

/// [`Validates`] implementation for PAdES documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct PadesValidator;

impl Validates for PadesValidator {
    fn validate(&self, document: &[u8], params: &ValidationParams) -> Result<Vec<SignValidity>> {
        validate(document, params)
    }
}
