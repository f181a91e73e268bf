//! Per-signature reports.

use super::certificate::CertificateSummary;
use super::cms::SignedDataEnvelope;
use super::types::{DigestAlgorithm, SignValidity, SignatureSubFilter};
use super::validator::check_signature;
use crate::document::{dict_text, PdfDocument, SignatureEntry};
use crate::error::Result;
use chrono::Utc;
use serde::Serialize;

/// What a document says about one of its signatures.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureReport {
    pub field_name: String,
    /// Revision the signature covers (0 is the original document)
    pub revision: usize,
    pub sub_filter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// `/M` as written, a PDF date
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_time: Option<String>,
    /// Digest name, or the raw OID when it names no digest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest_algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer: Option<CertificateSummary>,
    pub validity: Vec<SignValidity>,
}

fn report(doc: &PdfDocument, sig: &SignatureEntry) -> SignatureReport {
    let envelope = SignedDataEnvelope::from_der(&sig.contents).ok();
    let digest_algorithm = envelope
        .as_ref()
        .and_then(|e| e.signer_info().ok())
        .map(|info| match DigestAlgorithm::from_oid(&info.digest_alg.oid) {
            Some(alg) => alg.name().to_string(),
            None => info.digest_alg.oid.to_string(),
        });
    let signer = envelope
        .as_ref()
        .and_then(|e| e.signer_certificate().ok())
        .and_then(|der| CertificateSummary::from_der(&der).ok());
    let mut validity = check_signature(doc, sig, true, Utc::now());
    if validity.is_empty() {
        validity.push(SignValidity::ok());
    }
    SignatureReport {
        field_name: sig.field_name.clone(),
        revision: sig.revision,
        sub_filter: sig.sub_filter.clone(),
        reason: dict_text(&sig.dict, "Reason"),
        location: dict_text(&sig.dict, "Location"),
        contact: dict_text(&sig.dict, "ContactInfo"),
        signing_time: dict_text(&sig.dict, "M"),
        digest_algorithm,
        signer,
        validity,
    }
}

/// Report every signature of `document` that is not a document timestamp,
/// oldest revision first.
pub fn analyze(document: &[u8], passwords: &[&[u8]]) -> Result<Vec<SignatureReport>> {
    let doc = PdfDocument::open_with_passwords(document.to_vec(), passwords)?;
    let mut reports: Vec<SignatureReport> = doc
        .signatures()
        .iter()
        .filter(|sig| !SignatureSubFilter::from_pdf_name(&sig.sub_filter).is_timestamp())
        .map(|sig| report(&doc, sig))
        .collect();
    reports.sort_by_key(|r| r.revision);
    log::debug!("Analyzed {} signatures", reports.len());
    Ok(reports)
}
