//! Capabilities at the seams between signing, validation and time-stamping.

use super::params::{PadesParams, ValidationParams};
use super::timestamp::{TimestampRequest, TimestampToken};
use super::types::SignValidity;
use crate::error::Result;

/// Produces a signed copy of a document.
pub trait Signs {
    fn sign(&self, document: &[u8], params: &PadesParams) -> Result<Vec<u8>>;
}

/// Checks the signatures of a document.
pub trait Validates {
    fn validate(&self, document: &[u8], params: &ValidationParams) -> Result<Vec<SignValidity>>;
}

/// Obtains RFC 3161 tokens.
pub trait RequestsTimestamp: Send + Sync {
    fn request_token(&self, request: &TimestampRequest) -> Result<TimestampToken>;
}
