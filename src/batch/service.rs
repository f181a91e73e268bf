//! Request/response adapter for the batch endpoints.
//!
//! Parameters arrive as a string map, the way a servlet sees them. Presigned
//! batches are kept under their transaction id until they are posted,
//! aborted, or outlive the configured transaction TTL.

use super::definition::{decode_base64, BatchDefinition};
use super::orchestrator::{BatchOrchestrator, BatchSignatures, PresignedBatch};
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::signatures::certificate::decode_chain;
use crate::signatures::traits::RequestsTimestamp;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Batch definition, base64 JSON.
pub const PARAM_BATCH: &str = "json";
/// Signer chain, `;`-separated base64 certificates.
pub const PARAM_CERTS: &str = "certs";
/// Post request, base64 JSON.
pub const PARAM_SIGNATURES: &str = "tridata";
/// Transaction to abort.
pub const PARAM_TRID: &str = "trid";

pub const CONTENT_TYPE_JSON: &str = "application/json;charset=UTF-8";
pub const CONTENT_TYPE_TEXT: &str = "text/plain;charset=UTF-8";

/// Status, headers and body of an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    fn json(body: String, origin: &str) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("Access-Control-Allow-Origin".to_string(), origin.to_string()),
                ("Content-Type".to_string(), CONTENT_TYPE_JSON.to_string()),
            ],
            body: body.into_bytes(),
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), CONTENT_TYPE_TEXT.to_string())],
            body: message.into().into_bytes(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A presigned batch and when it was stored.
struct Pending {
    created: Instant,
    batch: PresignedBatch,
}

/// The presign, post and abort endpoints.
pub struct BatchService {
    orchestrator: BatchOrchestrator,
    transactions: Mutex<HashMap<String, Pending>>,
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl BatchService {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        Ok(Self {
            orchestrator: BatchOrchestrator::new(config)?,
            transactions: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_tsa(mut self, tsa: Arc<dyn RequestsTimestamp>) -> Self {
        self.orchestrator = self.orchestrator.with_tsa(tsa);
        self
    }

    fn transactions(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.transactions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Abort every batch older than the transaction TTL at `now`.
    fn evict_expired(&self, now: Instant) -> usize {
        let ttl = self.orchestrator.config().transaction_ttl();
        let expired: Vec<Pending> = {
            let mut transactions = self.transactions();
            let trids: Vec<String> = transactions
                .iter()
                .filter(|(_, p)| now.saturating_duration_since(p.created) >= ttl)
                .map(|(trid, _)| trid.clone())
                .collect();
            trids.iter().filter_map(|trid| transactions.remove(trid)).collect()
        };
        for pending in &expired {
            log::warn!("Batch {} expired without signatures", pending.batch.trid());
        }
        let count = expired.len();
        expired.into_iter().for_each(|p| p.batch.abort());
        count
    }

    /// Number of batches waiting for their signatures.
    pub fn pending(&self) -> usize {
        self.transactions().len()
    }

    fn origin(&self) -> &str {
        &self.orchestrator.config().access_control_allow_origin
    }

    /// Run the pre phase of the batch in `json` for the chain in `certs`.
    pub fn presign(&self, params: &HashMap<String, String>) -> Response {
        self.evict_expired(Instant::now());
        let Some(json) = required(params, PARAM_BATCH) else {
            log::warn!("Presign request without a batch definition");
            return Response::error(400, "No batch definition was received");
        };
        let definition = match BatchDefinition::from_base64(json) {
            Ok(definition) => definition,
            Err(e) => {
                log::warn!("Rejecting batch: {}", e);
                return Response::error(400, format!("The batch definition is not valid: {}", e));
            },
        };
        let Some(certs) = required(params, PARAM_CERTS) else {
            log::warn!("Presign request without a certificate chain");
            return Response::error(400, "No signer certificate was received");
        };
        let chain = match decode_chain(certs) {
            Ok(chain) => chain,
            Err(e) => {
                log::warn!("Rejecting certificate chain: {}", e);
                return Response::error(400, format!("The signer certificate is not valid: {}", e));
            },
        };

        let presigned = match self.orchestrator.run_batch(&definition, &chain) {
            Ok(presigned) => presigned,
            Err(e) => {
                log::error!("Batch presign failed: {}", e);
                return Response::error(500, format!("The batch could not be presigned: {}", e));
            },
        };
        let body = match presigned.to_json() {
            Ok(body) => body,
            Err(e) => {
                log::error!("Could not render the presign response: {}", e);
                return Response::error(500, format!("The batch could not be presigned: {}", e));
            },
        };
        self.transactions().insert(
            presigned.trid().to_string(),
            Pending {
                created: Instant::now(),
                batch: presigned,
            },
        );
        Response::json(body, self.origin())
    }

    /// Run the post phase for the signatures in `tridata`.
    pub fn post(&self, params: &HashMap<String, String>) -> Response {
        self.evict_expired(Instant::now());
        let Some(encoded) = required(params, PARAM_SIGNATURES) else {
            return Response::error(400, "No signatures were received");
        };
        let signatures = match decode_base64(encoded).and_then(|json| BatchSignatures::from_json(&json)) {
            Ok(signatures) => signatures,
            Err(e) => {
                log::warn!("Rejecting signatures: {}", e);
                return Response::error(400, format!("The signatures are not valid: {}", e));
            },
        };
        let Some(Pending { batch: presigned, .. }) = self.transactions().remove(&signatures.trid) else {
            log::warn!("Signatures for unknown batch {}", signatures.trid);
            return Response::error(400, format!("Unknown batch transaction '{}'", signatures.trid));
        };
        match self.post_presigned(presigned, &signatures) {
            Ok(body) => Response::json(body, self.origin()),
            Err(e) => {
                log::error!("Batch post failed: {}", e);
                Response::error(500, format!("The batch could not be completed: {}", e))
            },
        }
    }

    fn post_presigned(&self, presigned: PresignedBatch, signatures: &BatchSignatures) -> Result<String> {
        self.orchestrator.post_batch(presigned, signatures)?.to_json()
    }

    /// Discard the batch named by `trid`.
    pub fn abort(&self, params: &HashMap<String, String>) -> Response {
        let Some(trid) = required(params, PARAM_TRID) else {
            return Response::error(400, "No batch transaction was named");
        };
        match self.transactions().remove(trid) {
            Some(pending) => {
                pending.batch.abort();
                Response::json("{}".to_string(), self.origin())
            },
            None => Response::error(400, format!("Unknown batch transaction '{}'", trid)),
        }
    }
}

impl std::fmt::Debug for BatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchService")
            .field("config", self.orchestrator.config())
            .field("pending", &self.pending())
            .finish()
    }
}
