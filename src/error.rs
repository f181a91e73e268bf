//! Error types for the signing, validation and batch layers.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants are grouped
//! by [`ErrorCategory`] so callers (the batch orchestrator in particular) can
//! decide whether a failure is an input problem, a policy decision, a capacity
//! overflow or a network outage without matching every variant.

use std::fmt;

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A decision the caller must take before the operation can continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The document is certified and signing it would break the certification.
    SignCertifiedDocument,
    /// Form field values changed after the first signature.
    ModifiedForm,
    /// The last signed revision differs from the final document.
    ShadowAttack,
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Confirmation::SignCertifiedDocument => "signing a certified document",
            Confirmation::ModifiedForm => "form fields modified after signing",
            Confirmation::ShadowAttack => "suspected shadow attack",
        };
        f.write_str(text)
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Malformed document, batch, certificate or password. Never retried.
    Input,
    /// A policy blocks the operation (certified document, confirmation needed).
    Policy,
    /// The signature does not fit the reserved space.
    Capacity,
    /// A remote service (TSA, relay) could not be used.
    Network,
    /// Anything else.
    Internal,
}

/// Error types that can occur while signing or validating.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-', found '{0}'")]
    InvalidHeader(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table: {0}")]
    InvalidXref(String),

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unsupported feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Circular reference detected in object graph
    #[error("Circular reference detected: object {0}")]
    CircularReference(crate::object::ObjectRef),

    /// The document is encrypted and no password was supplied.
    #[error("The document is password protected")]
    PasswordRequired,

    /// The supplied password does not open the document.
    #[error("The supplied password does not open the document")]
    BadPassword,

    /// Security handler problem (unsupported revision, bad key material).
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// The document is certified and policy forbids signing it.
    #[error("The document is certified and may not be signed")]
    CertifiedDocumentRejected,

    /// The caller must confirm before the operation can continue.
    #[error("Confirmation needed: {0}")]
    NeedsConfirmation(Confirmation),

    /// The generated signature does not fit the reserved placeholder.
    #[error("Signature of {size} bytes exceeds the reserved capacity of {capacity} bytes")]
    SignatureTooLarge {
        /// Size of the encoded signature
        size: usize,
        /// Reserved capacity
        capacity: usize,
    },

    /// The time-stamping authority could not produce a token.
    #[error("Timestamp unavailable: {0}")]
    TimestampUnavailable(String),

    /// The intermediate relay server could not be reached.
    #[error("Relay error: {0}")]
    Relay(String),

    /// A signing or validation parameter is malformed.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter key
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// The batch definition or a batch request is malformed.
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// A certificate or certificate chain could not be decoded.
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Key or signature operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// ASN.1 encoding or decoding failed.
    #[error("ASN.1 error: {0}")]
    Asn1(#[from] der::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding failed.
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A freshly signed document did not pass validation.
    #[error("Signed document failed validation: {0}")]
    ValidationFailed(String),

    /// A sign task was asked to move along an edge its state machine lacks.
    #[error("Invalid task transition from {from} to {to}")]
    InvalidState {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidHeader(_)
            | Error::ParseError { .. }
            | Error::InvalidXref(_)
            | Error::ObjectNotFound(..)
            | Error::InvalidObjectType { .. }
            | Error::InvalidPdf(_)
            | Error::Decode(_)
            | Error::CircularReference(_)
            | Error::PasswordRequired
            | Error::BadPassword
            | Error::InvalidParameter { .. }
            | Error::InvalidBatch(_)
            | Error::InvalidCertificate(_)
            | Error::Asn1(_)
            | Error::Json(_)
            | Error::Base64(_) => ErrorCategory::Input,
            Error::CertifiedDocumentRejected
            | Error::NeedsConfirmation(_)
            | Error::ValidationFailed(_)
            | Error::Cancelled => {
                ErrorCategory::Policy
            },
            Error::SignatureTooLarge { .. } => ErrorCategory::Capacity,
            Error::TimestampUnavailable(_) | Error::Relay(_) => ErrorCategory::Network,
            Error::Io(_)
            | Error::Unsupported(_)
            | Error::Encryption(_)
            | Error::Crypto(_)
            | Error::InvalidState { .. } => ErrorCategory::Internal,
        }
    }

    /// Whether the caller may resolve the condition and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NeedsConfirmation(_) | Error::PasswordRequired)
    }

    pub(crate) fn parameter(name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
