//! Three-phase batch signing.
//!
//! ```text
//! BatchDefinition + certificate chain
//!     ↓ run_batch: reserve, digest, build signed attributes
//! PresignedBatch (data to sign per task)
//!     ↓ client signs every `pre` with its key
//! BatchSignatures (PKCS#1 per task)
//!     ↓ post_batch: assemble, timestamp, embed, validate
//! BatchResult
//! ```
//!
//! Each task fails on its own. Only a malformed batch as a whole is an
//! `Err`.

use super::definition::{decode_base64, BatchDefinition, SingleSign, SubOperation};
use super::task::{Phase, Prepared, SignTask, TaskResult, TaskState};
use crate::config::ServiceConfig;
use crate::error::{Error, ErrorCategory, Result};
use crate::signatures::builder;
use crate::signatures::certificate::decode_chain;
use crate::signatures::cms::{self, CmsOptions};
use crate::signatures::params::{ExtraParams, PadesParams, ValidationParams};
use crate::signatures::traits::RequestsTimestamp;
use crate::signatures::types::DigestAlgorithm;
use crate::signatures::validator;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Client signatures for a presigned batch.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSignatures {
    pub trid: String,
    pub signs: Vec<TaskSignature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSignature {
    pub id: String,
    /// Base64 PKCS#1 signature of the task's `pre`
    pub pk1: String,
}

impl BatchSignatures {
    pub fn from_json(json: &[u8]) -> Result<Self> {
        serde_json::from_slice(json).map_err(|e| Error::InvalidBatch(format!("malformed signatures: {}", e)))
    }
}

/// Final state of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub id: String,
    pub result: TaskResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip)]
    pub state: TaskState,
    #[serde(skip)]
    pub category: Option<ErrorCategory>,
    /// Signed document when DONE_AND_SAVED
    #[serde(skip)]
    pub document: Option<Vec<u8>>,
}

impl TaskOutcome {
    fn summary(task: &SignTask) -> Self {
        Self {
            id: task.id().to_string(),
            result: task.result(),
            description: task.failure().map(|f| f.description.clone()),
            state: task.state(),
            category: task.failure().map(|f| f.category),
            document: None,
        }
    }

    fn from_task(task: &mut SignTask) -> Self {
        Self {
            document: task.take_output(),
            ..Self::summary(task)
        }
    }
}

/// One entry per task of the batch, in definition order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub signs: Vec<TaskOutcome>,
}

impl BatchResult {
    pub fn get(&self, id: &str) -> Option<&TaskOutcome> {
        self.signs.iter().find(|s| s.id == id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Serialize)]
struct TriphaseEntry<'a> {
    id: &'a str,
    alg: String,
    pre: String,
}

#[derive(Serialize)]
struct PresignResponse<'a> {
    trid: &'a str,
    td: Vec<TriphaseEntry<'a>>,
    results: Vec<TaskOutcome>,
}

/// A batch between the pre and post phases. Owns the reserved documents.
#[derive(Debug)]
pub struct PresignedBatch {
    trid: String,
    stop_on_error: bool,
    tasks: Vec<SignTask>,
}

impl PresignedBatch {
    /// Transaction id tying the post request to this batch.
    pub fn trid(&self) -> &str {
        &self.trid
    }

    pub fn tasks(&self) -> &[SignTask] {
        &self.tasks
    }

    /// DER signed attributes of a presigned task.
    pub fn data_to_sign(&self, id: &str) -> Option<&[u8]> {
        self.tasks
            .iter()
            .find(|t| t.id() == id)
            .and_then(|t| t.prepared.as_ref())
            .map(|p| p.data_to_sign.as_slice())
    }

    /// Render the presign response.
    pub fn to_json(&self) -> Result<String> {
        let td = self
            .tasks
            .iter()
            .filter(|t| t.is_active())
            .filter_map(|t| {
                t.prepared.as_ref().map(|p| TriphaseEntry {
                    id: t.id(),
                    alg: p.algorithm.signature_algorithm(),
                    pre: STANDARD.encode(&p.data_to_sign),
                })
            })
            .collect();
        let results = self
            .tasks
            .iter()
            .filter(|t| !t.is_active())
            .map(TaskOutcome::summary)
            .collect();
        let response = PresignResponse {
            trid: &self.trid,
            td,
            results,
        };
        Ok(serde_json::to_string(&response)?)
    }

    /// Discard every reserved document.
    pub fn abort(mut self) {
        for task in &mut self.tasks {
            task.discard();
        }
        log::info!("Batch {} aborted", self.trid);
    }
}

/// Per-batch inputs of the pre phase.
struct PreContext<'a> {
    definition: &'a BatchDefinition,
    algorithm: DigestAlgorithm,
    defaults: ExtraParams,
    chain: Arc<Vec<Vec<u8>>>,
}

/// Runs batches with the strategy selected by [`ServiceConfig`].
pub struct BatchOrchestrator {
    config: ServiceConfig,
    pool: Option<ThreadPool>,
    tsa: Option<Arc<dyn RequestsTimestamp>>,
}

impl BatchOrchestrator {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let pool = if config.concurrent_mode {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.worker_threads)
                .thread_name(|i| format!("batch-worker-{}", i))
                .build()
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            log::debug!("Batch pool started with {} workers", config.worker_threads);
            Some(pool)
        } else {
            None
        };
        Ok(Self { config, pool, tsa: None })
    }

    /// Use `tsa` instead of the TSA URLs of the tasks.
    pub fn with_tsa(mut self, tsa: Arc<dyn RequestsTimestamp>) -> Self {
        self.tsa = Some(tsa);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Pre phase: reserve a signature in every document and compute what the
    /// client has to sign.
    pub fn run_batch(&self, definition: &BatchDefinition, chain: &[Vec<u8>]) -> Result<PresignedBatch> {
        if chain.is_empty() {
            return Err(Error::InvalidCertificate("empty certificate chain".to_string()));
        }
        let context = PreContext {
            definition,
            algorithm: definition.digest_algorithm()?,
            defaults: definition.extra_params()?,
            chain: Arc::new(chain.to_vec()),
        };
        let trid = uuid::Uuid::new_v4().to_string();
        log::info!("Presigning batch {} with {} documents", trid, definition.singlesigns.len());

        let mut tasks: Vec<SignTask> = definition.singlesigns.iter().map(|s| SignTask::new(&s.id)).collect();
        self.run_phase(&mut tasks, Phase::Pre, definition.stoponerror, |index, task| {
            let prepared = self.presign(&context, &definition.singlesigns[index])?;
            task.presigned(prepared)
        });
        Ok(PresignedBatch {
            trid,
            stop_on_error: definition.stoponerror,
            tasks,
        })
    }

    /// Post phase: wrap the client signatures and produce the signed
    /// documents.
    pub fn post_batch(&self, presigned: PresignedBatch, signatures: &BatchSignatures) -> Result<BatchResult> {
        if signatures.trid != presigned.trid {
            return Err(Error::InvalidBatch(format!(
                "signatures belong to batch {}, not {}",
                signatures.trid, presigned.trid
            )));
        }
        let PresignedBatch {
            trid,
            stop_on_error,
            mut tasks,
        } = presigned;
        let pk1: HashMap<&str, &str> = signatures.signs.iter().map(|s| (s.id.as_str(), s.pk1.as_str())).collect();
        let ids: Vec<String> = tasks.iter().map(|t| t.id().to_string()).collect();

        self.run_phase(&mut tasks, Phase::Post, stop_on_error, |index, task| {
            let pk1 = pk1
                .get(ids[index].as_str())
                .ok_or_else(|| Error::InvalidBatch(format!("no signature received for '{}'", ids[index])))?;
            self.postsign(task, pk1)
        });

        let signs: Vec<TaskOutcome> = tasks.iter_mut().map(TaskOutcome::from_task).collect();
        let done = signs.iter().filter(|s| s.result == TaskResult::DoneAndSaved).count();
        log::info!("Batch {} finished: {} of {} documents signed", trid, done, signs.len());
        Ok(BatchResult { signs })
    }

    /// Run `work` on every active task, serially or on the pool.
    fn run_phase<F>(&self, tasks: &mut [SignTask], phase: Phase, stop_on_error: bool, work: F)
    where
        F: Fn(usize, &mut SignTask) -> Result<()> + Sync,
    {
        match &self.pool {
            None => {
                let mut stopped = false;
                for (index, task) in tasks.iter_mut().enumerate() {
                    if !task.is_active() {
                        continue;
                    }
                    if stopped {
                        task.skip();
                        continue;
                    }
                    if let Err(e) = work(index, task) {
                        task.fail(phase, &e);
                        stopped = stop_on_error;
                    }
                }
            },
            Some(pool) => {
                let failures = pool.install(|| {
                    tasks
                        .par_iter_mut()
                        .enumerate()
                        .filter(|(_, task)| task.is_active())
                        .map(|(index, task)| match work(index, task) {
                            Ok(()) => 0usize,
                            Err(e) => {
                                task.fail(phase, &e);
                                1
                            },
                        })
                        .sum::<usize>()
                });
                if stop_on_error && failures > 0 {
                    tasks.iter_mut().filter(|t| t.is_active()).for_each(SignTask::skip);
                }
            },
        }
    }

    fn presign(&self, context: &PreContext<'_>, single: &SingleSign) -> Result<Prepared> {
        let format = single.format(context.definition);
        if !format.eq_ignore_ascii_case("pades") {
            return Err(Error::Unsupported(format!("signature format '{}'", format)));
        }
        if single.suboperation(context.definition) == SubOperation::Cosign {
            log::debug!("Task '{}' adds a signature to a signed document", single.id);
        }
        let chain = match &single.certs {
            Some(certs) => Arc::new(decode_chain(certs)?),
            None => Arc::clone(&context.chain),
        };
        let signer = chain
            .first()
            .ok_or_else(|| Error::InvalidCertificate("empty certificate chain".to_string()))?;

        let extra = single.extra_params(&context.defaults)?;
        let mut params = PadesParams::from_extra_params(&extra)?;
        if !extra.contains_key("tsaTimeout") {
            if let Some(tsa) = params.tsa.as_mut() {
                tsa.timeout_secs = self.config.tsa_timeout_secs;
            }
        }

        let document = single.load_data(&self.config.file_data_dirs)?;
        let material = builder::reserve_signature(&document, &params, signer)?;
        let digest = builder::compute_digest(&material, context.algorithm)?;
        let options = CmsOptions::from_params(context.algorithm, &params);
        let data_to_sign = cms::signed_attributes(&digest, &chain, &options)?;
        Ok(Prepared {
            material,
            params,
            algorithm: context.algorithm,
            chain,
            data_to_sign,
        })
    }

    fn postsign(&self, task: &mut SignTask, pk1: &str) -> Result<()> {
        let pk1 = decode_base64(pk1)?;
        let prepared = task.prepared.take().ok_or_else(|| Error::InvalidState {
            from: task.state().to_string(),
            to: TaskState::Signed.to_string(),
        })?;
        let signer = prepared
            .chain
            .first()
            .ok_or_else(|| Error::InvalidCertificate("empty certificate chain".to_string()))?;
        if self.config.check_signature_hash
            && !cms::verify_attributes(&prepared.data_to_sign, &pk1, signer, prepared.algorithm)?
        {
            return Err(Error::parameter("pk1", "the signature does not match the data to sign"));
        }
        let envelope = cms::assemble(&prepared.data_to_sign, &pk1, &prepared.chain, prepared.algorithm)?;
        task.transition(TaskState::Signed)?;

        let envelope = builder::attach_timestamp(&envelope, &prepared.params, self.tsa.as_deref())?;
        let signed = builder::embed(&prepared.material, &envelope)?;
        if self.config.validate_after_post {
            self.check_output(&signed, &prepared.params)?;
        }
        task.post_signed(signed)
    }

    fn check_output(&self, signed: &[u8], params: &PadesParams) -> Result<()> {
        let mut validation = ValidationParams::default().relaxed(self.config.relaxed_validation);
        validation.passwords = [&params.owner_password, &params.user_password]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        let findings = validator::validate(signed, &validation)?;
        match findings.iter().find(|f| !f.is_ok()) {
            Some(finding) => Err(Error::ValidationFailed(finding.to_string())),
            None => Ok(()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::client::sign_response;
    use super::*;
    use crate::document::fixtures::simple_pdf;
    use crate::signatures::timestamp::fake::FakeTsa;
    use crate::signatures::types::SignValidity;
    use crate::test_support;

    fn definition(entries: &[(&str, String)], extra: &str) -> BatchDefinition {
        let singles: Vec<serde_json::Value> = entries
            .iter()
            .map(|(id, data)| serde_json::json!({"id": id, "datareference": data}))
            .collect();
        let json = serde_json::json!({
            "algorithm": "SHA256withRSA",
            "extraparams": STANDARD.encode(extra),
            "stoponerror": false,
            "singlesigns": singles,
        });
        BatchDefinition::from_json(json.to_string().as_bytes()).unwrap()
    }

    fn pdf(pages: usize) -> String {
        STANDARD.encode(simple_pdf(pages, false))
    }

    fn chain() -> Vec<Vec<u8>> {
        vec![test_support::certificate().to_vec()]
    }

    fn run(orchestrator: &BatchOrchestrator, batch: &BatchDefinition) -> (String, BatchResult) {
        let presigned = orchestrator.run_batch(batch, &chain()).unwrap();
        let json = presigned.to_json().unwrap();
        let signatures = sign_response(&json);
        (json, orchestrator.post_batch(presigned, &signatures).unwrap())
    }

    fn results(result: &BatchResult) -> Vec<TaskResult> {
        result.signs.iter().map(|s| s.result).collect()
    }

    #[test]
    fn test_serial_batch() {
        let orchestrator = BatchOrchestrator::new(ServiceConfig::new()).unwrap();
        let batch = definition(&[("1", pdf(1)), ("2", pdf(2))], "signReason=Lote");
        let (json, result) = run(&orchestrator, &batch);

        let presign: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(presign["td"].as_array().unwrap().len(), 2);
        assert_eq!(presign["td"][0]["alg"], "SHA256withRSA");
        assert!(presign["results"].as_array().unwrap().is_empty());

        assert_eq!(results(&result), vec![TaskResult::DoneAndSaved; 2]);
        for outcome in &result.signs {
            assert_eq!(outcome.state, TaskState::PostSigned);
            let signed = outcome.document.as_ref().unwrap();
            assert_eq!(
                validator::validate(signed, &ValidationParams::default()).unwrap(),
                vec![SignValidity::ok()]
            );
        }
        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["signs"][1]["id"], "2");
        assert_eq!(json["signs"][1]["result"], "DONE_AND_SAVED");
        assert!(json["signs"][1].get("description").is_none());
    }

    #[test]
    fn test_failed_task_does_not_stop_siblings() {
        let orchestrator = BatchOrchestrator::new(ServiceConfig::new()).unwrap();
        let batch = definition(&[("ok", pdf(1)), ("bad", STANDARD.encode("not a pdf")), ("ok2", pdf(1))], "");
        let (json, result) = run(&orchestrator, &batch);

        let presign: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(presign["results"][0]["id"], "bad");
        assert_eq!(presign["results"][0]["result"], "ERROR_PRE");

        assert_eq!(
            results(&result),
            vec![TaskResult::DoneAndSaved, TaskResult::ErrorPre, TaskResult::DoneAndSaved]
        );
        let bad = result.get("bad").unwrap();
        assert_eq!(bad.state, TaskState::Failed);
        assert_eq!(bad.category, Some(ErrorCategory::Input));
        assert!(bad.document.is_none());
    }

    #[test]
    fn test_serial_stop_on_error_skips_the_rest() {
        let orchestrator = BatchOrchestrator::new(ServiceConfig::new()).unwrap();
        let mut batch = definition(&[("1", pdf(1)), ("2", STANDARD.encode("junk")), ("3", pdf(1))], "");
        batch.stoponerror = true;
        let (json, result) = run(&orchestrator, &batch);

        let presign: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(presign["td"].as_array().unwrap().len(), 1);
        assert_eq!(presign["results"][1]["result"], "SKIPPED");
        assert_eq!(
            results(&result),
            vec![TaskResult::DoneAndSaved, TaskResult::ErrorPre, TaskResult::Skipped]
        );
    }

    #[test]
    fn test_concurrent_batch() {
        let config = ServiceConfig::new().with_concurrent_mode(true).with_worker_threads(3);
        let orchestrator = BatchOrchestrator::new(config).unwrap();
        let entries: Vec<(String, String)> = (1..=5).map(|i| (i.to_string(), pdf(i))).collect();
        let entries: Vec<(&str, String)> = entries.iter().map(|(id, d)| (id.as_str(), d.clone())).collect();
        let (_, result) = run(&orchestrator, &definition(&entries, ""));

        let ids: Vec<&str> = result.signs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
        assert_eq!(results(&result), vec![TaskResult::DoneAndSaved; 5]);
    }

    #[test]
    fn test_concurrent_stop_on_error_skips_survivors() {
        let config = ServiceConfig::new().with_concurrent_mode(true).with_worker_threads(2);
        let orchestrator = BatchOrchestrator::new(config).unwrap();
        let mut batch = definition(&[("1", pdf(1)), ("2", STANDARD.encode("junk")), ("3", pdf(1))], "");
        batch.stoponerror = true;
        let presigned = orchestrator.run_batch(&batch, &chain()).unwrap();
        assert!(presigned.tasks().iter().all(|t| !t.is_active()));
        let result = orchestrator.post_batch(presigned, &BatchSignatures {
            trid: String::new(),
            signs: vec![],
        });
        assert!(matches!(result, Err(Error::InvalidBatch(_))));
    }

    #[test]
    fn test_concurrent_stop_on_error_keeps_finished_tasks() {
        let config = ServiceConfig::new().with_concurrent_mode(true).with_worker_threads(2);
        let orchestrator = BatchOrchestrator::new(config).unwrap();
        let mut batch = definition(&[("1", pdf(1)), ("2", pdf(1)), ("3", pdf(1))], "");
        batch.stoponerror = true;
        let presigned = orchestrator.run_batch(&batch, &chain()).unwrap();
        let mut signatures = sign_response(&presigned.to_json().unwrap());
        signatures.signs.retain(|s| s.id != "2");
        let result = orchestrator.post_batch(presigned, &signatures).unwrap();

        assert_eq!(
            results(&result),
            vec![TaskResult::DoneAndSaved, TaskResult::ErrorPost, TaskResult::DoneAndSaved]
        );
        for id in ["1", "3"] {
            let outcome = result.get(id).unwrap();
            assert_eq!(outcome.state, TaskState::PostSigned);
            assert!(outcome.document.is_some());
        }
    }

    #[test]
    fn test_unsupported_format_fails_the_task() {
        let orchestrator = BatchOrchestrator::new(ServiceConfig::new()).unwrap();
        let mut batch = definition(&[("1", pdf(1))], "");
        batch.singlesigns[0].format = Some("CAdES".into());
        let presigned = orchestrator.run_batch(&batch, &chain()).unwrap();
        let task = &presigned.tasks()[0];
        assert_eq!(task.result(), TaskResult::ErrorPre);
        assert!(task.failure().unwrap().description.contains("CAdES"));
    }

    #[test]
    fn test_signature_hash_check() {
        let batch = definition(&[("1", pdf(1))], "");
        let forged = |orchestrator: &BatchOrchestrator| {
            let presigned = orchestrator.run_batch(&batch, &chain()).unwrap();
            let mut signatures = sign_response(&presigned.to_json().unwrap());
            signatures.signs[0].pk1 = STANDARD.encode(vec![7u8; 128]);
            orchestrator.post_batch(presigned, &signatures).unwrap()
        };

        let checked = forged(&BatchOrchestrator::new(ServiceConfig::new()).unwrap());
        assert_eq!(checked.signs[0].result, TaskResult::ErrorPost);
        assert_eq!(checked.signs[0].category, Some(ErrorCategory::Input));

        // Without the check the forged signature is embedded, and only
        // validation after POST notices it
        let lenient = ServiceConfig::new().with_signature_hash_check(false);
        let unchecked = forged(&BatchOrchestrator::new(lenient.clone()).unwrap());
        assert_eq!(unchecked.signs[0].result, TaskResult::DoneAndSaved);

        let validated = forged(&BatchOrchestrator::new(lenient.with_validation_after_post(true)).unwrap());
        assert_eq!(validated.signs[0].result, TaskResult::ErrorPost);
        assert!(validated.signs[0].description.as_deref().unwrap().contains("NO_MATCH_DATA"));
    }

    #[test]
    fn test_missing_signature_fails_only_that_task() {
        let orchestrator = BatchOrchestrator::new(ServiceConfig::new()).unwrap();
        let batch = definition(&[("1", pdf(1)), ("2", pdf(1))], "");
        let presigned = orchestrator.run_batch(&batch, &chain()).unwrap();
        let mut signatures = sign_response(&presigned.to_json().unwrap());
        signatures.signs.retain(|s| s.id == "1");
        let result = orchestrator.post_batch(presigned, &signatures).unwrap();
        assert_eq!(results(&result), vec![TaskResult::DoneAndSaved, TaskResult::ErrorPost]);
    }

    #[test]
    fn test_batch_level_errors() {
        let orchestrator = BatchOrchestrator::new(ServiceConfig::new()).unwrap();
        let batch = definition(&[("1", pdf(1))], "");
        assert!(matches!(orchestrator.run_batch(&batch, &[]), Err(Error::InvalidCertificate(_))));

        let mut md5 = batch.clone();
        md5.algorithm = "MD5withRSA".into();
        assert!(matches!(orchestrator.run_batch(&md5, &chain()), Err(Error::InvalidParameter { .. })));

        let presigned = orchestrator.run_batch(&batch, &chain()).unwrap();
        let mut signatures = sign_response(&presigned.to_json().unwrap());
        signatures.trid = "another".into();
        assert!(matches!(orchestrator.post_batch(presigned, &signatures), Err(Error::InvalidBatch(_))));
    }

    #[test]
    fn test_timestamped_batch() {
        let extra = "tsaURL=http://tsa.example.com/tsr\ntsaPolicy=1.2.3.4";
        let batch = definition(&[("1", pdf(1))], extra);

        let stamped = BatchOrchestrator::new(ServiceConfig::new())
            .unwrap()
            .with_tsa(Arc::new(FakeTsa { fail: false }));
        let (_, result) = run(&stamped, &batch);
        let signed = result.signs[0].document.as_ref().unwrap();
        let doc = crate::document::PdfDocument::open(signed.clone()).unwrap();
        let envelope = cms::SignedDataEnvelope::from_der(&doc.signatures()[0].contents).unwrap();
        assert!(envelope.has_unsigned_attribute(cms::OID_TIMESTAMP_TOKEN));

        let down = BatchOrchestrator::new(ServiceConfig::new())
            .unwrap()
            .with_tsa(Arc::new(FakeTsa { fail: true }));
        let (_, result) = run(&down, &batch);
        assert_eq!(result.signs[0].result, TaskResult::ErrorPost);
        assert_eq!(result.signs[0].category, Some(ErrorCategory::Network));
    }

    #[test]
    fn test_abort_discards_materials() {
        let orchestrator = BatchOrchestrator::new(ServiceConfig::new()).unwrap();
        let presigned = orchestrator.run_batch(&definition(&[("1", pdf(1))], ""), &chain()).unwrap();
        assert!(presigned.data_to_sign("1").is_some());
        assert!(presigned.data_to_sign("2").is_none());
        presigned.abort();
    }
}
