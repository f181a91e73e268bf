//! Batch definitions as received from the client.

use crate::error::{Error, Result};
use crate::signatures::params::{parse_properties, ExtraParams};
use crate::signatures::types::DigestAlgorithm;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const FILE_SCHEME: &str = "file://";

/// Decode standard or URL-safe base64.
pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    STANDARD
        .decode(text)
        .or_else(|_| URL_SAFE.decode(text))
        .or_else(|_| URL_SAFE_NO_PAD.decode(text))
        .map_err(Error::from)
}

/// What a task does to its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubOperation {
    #[default]
    Sign,
    /// Another signature over an already signed document
    Cosign,
}

/// Ordered set of sign tasks sharing defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchDefinition {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub suboperation: SubOperation,
    /// Base64 properties applied to every task
    #[serde(default)]
    pub extraparams: Option<String>,
    #[serde(default)]
    pub stoponerror: bool,
    pub singlesigns: Vec<SingleSign>,
}

/// One document of a batch.
#[derive(Debug, Clone, Deserialize)]
pub struct SingleSign {
    pub id: String,
    /// Inline base64 bytes or a `file://` path
    pub datareference: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub suboperation: Option<SubOperation>,
    #[serde(default)]
    pub extraparams: Option<String>,
    /// Certificate chain replacing the batch signer's
    #[serde(default)]
    pub certs: Option<String>,
}

fn default_algorithm() -> String {
    "SHA256withRSA".to_string()
}

fn default_format() -> String {
    "PAdES".to_string()
}

fn decode_properties(encoded: Option<&str>, what: &str) -> Result<ExtraParams> {
    match encoded.map(str::trim).filter(|e| !e.is_empty()) {
        None => Ok(ExtraParams::new()),
        Some(encoded) => {
            let bytes = decode_base64(encoded)
                .map_err(|e| Error::InvalidBatch(format!("extra parameters of {} are not base64: {}", what, e)))?;
            Ok(parse_properties(&String::from_utf8_lossy(&bytes)))
        },
    }
}

impl BatchDefinition {
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let definition: Self =
            serde_json::from_slice(json).map_err(|e| Error::InvalidBatch(format!("malformed batch JSON: {}", e)))?;
        definition.check()?;
        Ok(definition)
    }

    /// Parse the base64 form used on the wire.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let json = decode_base64(encoded).map_err(|e| Error::InvalidBatch(format!("batch is not base64: {}", e)))?;
        Self::from_json(&json)
    }

    fn check(&self) -> Result<()> {
        if self.singlesigns.is_empty() {
            return Err(Error::InvalidBatch("the batch has no documents".to_string()));
        }
        let mut ids = HashSet::new();
        for single in &self.singlesigns {
            if single.id.trim().is_empty() {
                return Err(Error::InvalidBatch("a document has an empty id".to_string()));
            }
            if !ids.insert(single.id.as_str()) {
                return Err(Error::InvalidBatch(format!("duplicate document id '{}'", single.id)));
            }
        }
        Ok(())
    }

    pub fn digest_algorithm(&self) -> Result<DigestAlgorithm> {
        DigestAlgorithm::from_signature_algorithm(&self.algorithm)
    }

    /// Extra parameters shared by every task.
    pub fn extra_params(&self) -> Result<ExtraParams> {
        decode_properties(self.extraparams.as_deref(), "the batch")
    }
}

impl SingleSign {
    /// Effective format, falling back to the batch default.
    pub fn format<'a>(&'a self, batch: &'a BatchDefinition) -> &'a str {
        self.format.as_deref().unwrap_or(&batch.format)
    }

    pub fn suboperation(&self, batch: &BatchDefinition) -> SubOperation {
        self.suboperation.unwrap_or(batch.suboperation)
    }

    /// Task parameters over the batch defaults.
    pub fn extra_params(&self, defaults: &ExtraParams) -> Result<ExtraParams> {
        let mut merged = defaults.clone();
        merged.extend(decode_properties(self.extraparams.as_deref(), &format!("document '{}'", self.id))?);
        Ok(merged)
    }

    /// Bytes of the document to sign.
    ///
    /// `file://` references are read only from inside `file_dirs`; with no
    /// directories they are refused.
    pub fn load_data(&self, file_dirs: &[PathBuf]) -> Result<Vec<u8>> {
        match self.datareference.strip_prefix(FILE_SCHEME) {
            Some(path) => {
                let path = self.allowed_file(Path::new(path), file_dirs)?;
                log::debug!("Reading document '{}' from {}", self.id, path.display());
                Ok(std::fs::read(path)?)
            },
            None => decode_base64(&self.datareference)
                .map_err(|e| Error::InvalidBatch(format!("data of document '{}' is not base64: {}", self.id, e))),
        }
    }

    fn allowed_file(&self, path: &Path, file_dirs: &[PathBuf]) -> Result<PathBuf> {
        if file_dirs.is_empty() {
            log::warn!("Document '{}' references a file, but file references are disabled", self.id);
            return Err(Error::InvalidBatch(format!("document '{}': file references are not allowed", self.id)));
        }
        let path = path.canonicalize()?;
        let inside = file_dirs
            .iter()
            .filter_map(|dir| dir.canonicalize().ok())
            .any(|dir| path.starts_with(dir));
        if !inside {
            log::warn!("Document '{}' references {} outside the allowed directories", self.id, path.display());
            return Err(Error::InvalidBatch(format!(
                "document '{}': file is outside the allowed directories",
                self.id
            )));
        }
        Ok(path)
    }
}
