//! Three-phase batch signing.
//!
//! The server keeps the documents; the client only ever sees and signs the
//! DER signed attributes of each one. See [`orchestrator`] for the flow and
//! [`service`] for the request/response surface.

pub mod definition;
pub mod orchestrator;
pub mod service;
pub mod task;

pub use definition::{BatchDefinition, SingleSign, SubOperation};
pub use orchestrator::{BatchOrchestrator, BatchResult, BatchSignatures, PresignedBatch, TaskOutcome, TaskSignature};
pub use service::{BatchService, Response};
pub use task::{Phase, SignTask, TaskFailure, TaskResult, TaskState};
