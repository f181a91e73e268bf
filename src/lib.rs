// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::should_implement_trait)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # pades_triphase
//!
//! PAdES signing and validation with a three-phase batch protocol.
//!
//! ## Core Features
//!
//! ### Signing
//! - **Incremental revisions**: every signature is appended as a new revision;
//!   earlier bytes are never touched
//! - **Three phases**: reserve and digest on the server, PKCS#1 on the key
//!   holder, assembly and embedding back on the server
//! - **Appearance**: invisible signatures, text layers and JPEG rubrics
//! - **Timestamps**: RFC 3161 tokens added as unsigned attributes
//! - **Encrypted documents**: RC4 and AES standard security handlers
//!
//! ### Validation
//! - **Signature checks**: byte range, message digest, signer certificate
//!   validity
//! - **Tamper detection**: form values and page content changed after
//!   signing
//!
//! ### Batches
//! - **Serial or concurrent** execution on a fixed thread pool
//! - **Per-task failures** that never abort the rest of the batch
//!
//! ## Quick Start
//!
//! ```ignore
//! use pades_triphase::signatures::{validate, DigestAlgorithm, PadesParams, PadesSigner, Signs, ValidationParams};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = PadesSigner::new(credentials, DigestAlgorithm::Sha256);
//! let signed = signer.sign(&std::fs::read("contract.pdf")?, &PadesParams::default())?;
//! for finding in validate(&signed, &ValidationParams::default())? {
//!     println!("{}", finding);
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;

// Stream decoders
pub mod decoders;

// Encryption support
pub mod encryption;

// Incremental writing
pub mod writer;

// Digital signatures
pub mod signatures;

// Three-phase batches
pub mod batch;

// Relay keep-alive
pub mod relay;

// Configuration
pub mod config;

#[cfg(test)]
mod test_support;

// Re-exports
pub use config::ServiceConfig;
pub use document::PdfDocument;
pub use error::{Error, ErrorCategory, Result};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
