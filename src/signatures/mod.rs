//! PAdES signatures.
//!
//! Signing splits into the steps of the three-phase protocol so the private
//! key operation can run elsewhere:
//!
//! ```ignore
//! use pades_triphase::signatures::{builder, cms, DigestAlgorithm, PadesParams};
//!
//! let material = builder::reserve_signature(&pdf, &params, &chain[0])?;
//! let digest = builder::compute_digest(&material, DigestAlgorithm::Sha256)?;
//! let options = cms::CmsOptions::from_params(DigestAlgorithm::Sha256, &params);
//! let to_sign = cms::signed_attributes(&digest, &chain, &options)?;
//! // ... PKCS#1 signature of `to_sign` computed by the key holder ...
//! let envelope = cms::assemble(&to_sign, &pkcs1, &chain, DigestAlgorithm::Sha256)?;
//! let envelope = builder::attach_timestamp(&envelope, &params, None)?;
//! let signed = builder::embed(&material, &envelope)?;
//! ```
//!
//! With a local key, [`PadesSigner`] runs all steps at once. [`validate`]
//! checks the signatures of a document and looks for changes appended
//! after signing.
//!
//! ## References
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ETSI EN 319 142 - PAdES
//! - RFC 5652 (CMS), RFC 5035 (ESS signing certificate v2), RFC 3161 (TSP)

pub mod analyzer;
pub mod appearance;
pub mod builder;
pub mod byterange;
pub mod certificate;
pub mod cms;
pub mod params;
pub mod tamper;
pub mod timestamp;
pub mod traits;
pub mod types;
pub mod validator;

pub use analyzer::{analyze, SignatureReport};
pub use builder::{PadesSigner, SigningMaterial};
pub use byterange::ByteRangeCalculator;
pub use cms::{CmsOptions, SignedDataEnvelope};
pub use params::{parse_properties, ExtraParams, PadesParams, Placement, ValidationParams, LAST_PAGE};
pub use timestamp::{HttpTsaClient, TimestampRequest, TimestampToken};
pub use traits::{RequestsTimestamp, Signs, Validates};
pub use types::{
    DigestAlgorithm, SignValidity, SignatureSubFilter, SigningCredentials, ValidityDetail, ValidityError,
};
pub use validator::{validate, PadesValidator};
