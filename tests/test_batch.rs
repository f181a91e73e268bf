//! Integration tests for three-phase batches, driven the way a client would.

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pades_triphase::batch::{BatchDefinition, BatchOrchestrator, BatchService, BatchSignatures, TaskResult, TaskState};
use pades_triphase::signatures::{cms, validate, DigestAlgorithm, SignValidity, ValidationParams};
use pades_triphase::{ErrorCategory, ServiceConfig};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Sign every `pre` of a presign response with the fixture key.
fn client_signatures(presign: &str) -> Value {
    let response: Value = serde_json::from_str(presign).unwrap();
    let signs: Vec<Value> = response["td"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| {
            let pre = STANDARD.decode(entry["pre"].as_str().unwrap()).unwrap();
            let alg = DigestAlgorithm::from_signature_algorithm(entry["alg"].as_str().unwrap()).unwrap();
            let pk1 = cms::sign_attributes(&pre, common::key(), alg).unwrap();
            json!({ "id": entry["id"], "pk1": STANDARD.encode(pk1) })
        })
        .collect();
    json!({ "trid": response["trid"], "signs": signs })
}

fn inline(pages: usize) -> String {
    STANDARD.encode(common::pdf(pages, false))
}

fn certs() -> String {
    STANDARD.encode(common::certificate())
}

#[test]
fn test_concurrent_batch_with_failing_task() {
    let orchestrator = BatchOrchestrator::new(ServiceConfig::new().with_concurrent_mode(true).with_worker_threads(2)).unwrap();
    let definition = BatchDefinition::from_json(
        json!({
            "algorithm": "SHA256withRSA",
            "format": "PAdES",
            "singlesigns": [
                { "id": "first", "datareference": inline(1) },
                { "id": "broken", "datareference": inline(1), "certs": "AAAA" },
                { "id": "third", "datareference": inline(3) },
            ]
        })
        .to_string()
        .as_bytes(),
    )
    .unwrap();

    let presigned = orchestrator.run_batch(&definition, &[common::certificate()]).unwrap();
    let presign = presigned.to_json().unwrap();
    let response: Value = serde_json::from_str(&presign).unwrap();
    assert_eq!(response["td"].as_array().unwrap().len(), 2);
    assert_eq!(response["results"][0]["id"], "broken");
    assert_eq!(response["results"][0]["result"], "ERROR_PRE");

    let signatures = BatchSignatures::from_json(client_signatures(&presign).to_string().as_bytes()).unwrap();
    let result = orchestrator.post_batch(presigned, &signatures).unwrap();

    let ids: Vec<&str> = result.signs.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["first", "broken", "third"]);
    for id in ["first", "third"] {
        let outcome = result.get(id).unwrap();
        assert_eq!(outcome.state, TaskState::PostSigned);
        assert_eq!(outcome.result, TaskResult::DoneAndSaved);
        let document = outcome.document.as_deref().unwrap();
        assert_eq!(validate(document, &ValidationParams::default()).unwrap(), vec![SignValidity::ok()]);
    }
    let broken = result.get("broken").unwrap();
    assert_eq!(broken.state, TaskState::Failed);
    assert_eq!(broken.result, TaskResult::ErrorPre);
    assert_eq!(broken.category, Some(ErrorCategory::Input));
    assert!(broken.document.is_none());
}

#[test]
fn test_file_reference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contract.pdf");
    std::fs::write(&path, common::pdf(2, true)).unwrap();
    let elsewhere = tempfile::tempdir().unwrap();
    let private = elsewhere.path().join("private.pdf");
    std::fs::write(&private, common::pdf(1, false)).unwrap();

    let orchestrator = BatchOrchestrator::new(ServiceConfig::default().with_file_data_dir(dir.path())).unwrap();
    let definition = BatchDefinition::from_json(
        json!({
            "singlesigns": [
                { "id": "on-disk", "datareference": format!("file://{}", path.display()) },
                { "id": "missing", "datareference": format!("file://{}", dir.path().join("gone.pdf").display()) },
                { "id": "outside", "datareference": format!("file://{}", private.display()) },
            ]
        })
        .to_string()
        .as_bytes(),
    )
    .unwrap();
    let presigned = orchestrator.run_batch(&definition, &[common::certificate()]).unwrap();
    let signatures =
        BatchSignatures::from_json(client_signatures(&presigned.to_json().unwrap()).to_string().as_bytes()).unwrap();
    let result = orchestrator.post_batch(presigned, &signatures).unwrap();

    assert_eq!(result.get("on-disk").unwrap().result, TaskResult::DoneAndSaved);
    let missing = result.get("missing").unwrap();
    assert_eq!(missing.result, TaskResult::ErrorPre);
    assert_eq!(missing.category, Some(ErrorCategory::Internal));
    let outside = result.get("outside").unwrap();
    assert_eq!(outside.result, TaskResult::ErrorPre);
    assert_eq!(outside.category, Some(ErrorCategory::Input));
    assert!(outside.document.is_none());
}

#[test]
fn test_file_reference_disabled_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contract.pdf");
    std::fs::write(&path, common::pdf(1, false)).unwrap();

    let orchestrator = BatchOrchestrator::new(ServiceConfig::default()).unwrap();
    let definition = BatchDefinition::from_json(
        json!({ "singlesigns": [{ "id": "on-disk", "datareference": format!("file://{}", path.display()) }] })
            .to_string()
            .as_bytes(),
    )
    .unwrap();
    let presigned = orchestrator.run_batch(&definition, &[common::certificate()]).unwrap();
    let task = &presigned.tasks()[0];
    assert_eq!(task.result(), TaskResult::ErrorPre);
    assert!(task.failure().unwrap().description.contains("not allowed"));
}

mod service_tests {
    use super::*;

    fn params(pairs: &[(&str, String)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn batch() -> String {
        STANDARD.encode(
            json!({
                "extraparams": STANDARD.encode("signReason=Lote\n"),
                "singlesigns": [
                    { "id": "a", "datareference": inline(1) },
                    { "id": "b", "datareference": inline(2) },
                ]
            })
            .to_string(),
        )
    }

    #[test]
    fn test_presign_and_post() {
        let service = BatchService::new(ServiceConfig::default().with_allow_origin("https://sede.example.com")).unwrap();
        let presign = service.presign(&params(&[("json", batch()), ("certs", certs())]));
        assert_eq!(presign.status, 200, "{}", presign.text());
        assert_eq!(presign.header("content-type"), Some("application/json;charset=UTF-8"));
        assert_eq!(presign.header("Access-Control-Allow-Origin"), Some("https://sede.example.com"));
        assert_eq!(service.pending(), 1);

        let tridata = STANDARD.encode(client_signatures(&presign.text()).to_string());
        let post = service.post(&params(&[("tridata", tridata.clone())]));
        assert_eq!(post.status, 200, "{}", post.text());
        assert_eq!(service.pending(), 0);
        let body: Value = serde_json::from_slice(&post.body).unwrap();
        let results: Vec<(&str, &str)> = body["signs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| (s["id"].as_str().unwrap(), s["result"].as_str().unwrap()))
            .collect();
        assert_eq!(results, vec![("a", "DONE_AND_SAVED"), ("b", "DONE_AND_SAVED")]);

        // The transaction is gone once posted
        assert_eq!(service.post(&params(&[("tridata", tridata)])).status, 400);
    }

    #[test]
    fn test_bad_requests() {
        let service = BatchService::new(ServiceConfig::default()).unwrap();
        let missing_batch = service.presign(&params(&[("certs", certs())]));
        assert_eq!(missing_batch.status, 400);
        assert_eq!(missing_batch.header("Content-Type"), Some("text/plain;charset=UTF-8"));
        assert_eq!(service.presign(&params(&[("json", batch())])).status, 400);
        assert_eq!(service.presign(&params(&[("json", "e30=".to_string()), ("certs", certs())])).status, 400);
        assert_eq!(service.presign(&params(&[("json", batch()), ("certs", "AAAA".to_string())])).status, 400);
        assert_eq!(service.post(&params(&[])).status, 400);
        assert_eq!(service.abort(&params(&[("trid", "unknown".to_string())])).status, 400);
        assert_eq!(service.pending(), 0);
    }

    #[test]
    fn test_abort() {
        let service = BatchService::new(ServiceConfig::default()).unwrap();
        let presign = service.presign(&params(&[("json", batch()), ("certs", certs())]));
        let trid = serde_json::from_slice::<Value>(&presign.body).unwrap()["trid"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(service.abort(&params(&[("trid", trid)])).status, 200);
        assert_eq!(service.pending(), 0);
    }
}
