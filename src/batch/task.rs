//! Sign task lifecycle.

use crate::error::{Error, ErrorCategory, Result};
use crate::signatures::builder::SigningMaterial;
use crate::signatures::params::PadesParams;
use crate::signatures::types::DigestAlgorithm;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Position of a task in the three-phase protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    New,
    /// Signature reserved, data to sign sent to the client
    PreSigned,
    /// PKCS#1 received and wrapped into an envelope
    Signed,
    /// Signed document produced
    PostSigned,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::PostSigned | TaskState::Failed)
    }

    fn can_move_to(&self, to: TaskState) -> bool {
        match (self, to) {
            (TaskState::New, TaskState::PreSigned)
            | (TaskState::PreSigned, TaskState::Signed)
            | (TaskState::Signed, TaskState::PostSigned) => true,
            (from, TaskState::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::New => "NEW",
            TaskState::PreSigned => "PRE_SIGNED",
            TaskState::Signed => "SIGNED",
            TaskState::PostSigned => "POST_SIGNED",
            TaskState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Phase in which a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub phase: Phase,
    pub category: ErrorCategory,
    pub description: String,
}

/// Outcome reported to the client for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResult {
    DoneAndSaved,
    ErrorPre,
    ErrorPost,
    Skipped,
}

/// What the pre phase leaves behind for the post phase.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub material: SigningMaterial,
    pub params: PadesParams,
    pub algorithm: DigestAlgorithm,
    pub chain: Arc<Vec<Vec<u8>>>,
    /// DER signed attributes the client signs
    pub data_to_sign: Vec<u8>,
}

/// One document moving through the batch.
#[derive(Debug)]
pub struct SignTask {
    id: String,
    state: TaskState,
    failure: Option<TaskFailure>,
    skipped: bool,
    pub(crate) prepared: Option<Prepared>,
    output: Option<Vec<u8>>,
}

impl SignTask {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: TaskState::New,
            failure: None,
            skipped: false,
            prepared: None,
            output: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// Whether the task still has phases to run.
    pub fn is_active(&self) -> bool {
        !self.skipped && !self.state.is_terminal()
    }

    /// The signed document, once POST_SIGNED.
    pub fn output(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    pub(crate) fn take_output(&mut self) -> Option<Vec<u8>> {
        self.output.take()
    }

    pub fn transition(&mut self, to: TaskState) -> Result<()> {
        if !self.state.can_move_to(to) {
            return Err(Error::InvalidState {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        log::debug!("Task '{}': {} -> {}", self.id, self.state, to);
        self.state = to;
        Ok(())
    }

    pub(crate) fn presigned(&mut self, prepared: Prepared) -> Result<()> {
        self.transition(TaskState::PreSigned)?;
        self.prepared = Some(prepared);
        Ok(())
    }

    pub(crate) fn post_signed(&mut self, document: Vec<u8>) -> Result<()> {
        self.transition(TaskState::PostSigned)?;
        self.prepared = None;
        self.output = Some(document);
        Ok(())
    }

    /// Record `error` and drop whatever the task held.
    pub fn fail(&mut self, phase: Phase, error: &Error) {
        if self.transition(TaskState::Failed).is_err() {
            log::warn!("Task '{}' already finished, not recording failure: {}", self.id, error);
            return;
        }
        log::error!("Task '{}' failed: {}", self.id, error);
        self.failure = Some(TaskFailure {
            phase,
            category: error.category(),
            description: error.to_string(),
        });
        self.prepared = None;
        self.output = None;
    }

    /// Take the task out of the batch without a failure of its own.
    ///
    /// Finished tasks keep their outcome.
    pub fn skip(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        log::info!("Skipping task '{}'", self.id);
        self.skipped = true;
        self.prepared = None;
        self.output = None;
    }

    /// Drop the reserved material, keeping the recorded outcome.
    pub(crate) fn discard(&mut self) {
        self.prepared = None;
    }

    pub fn result(&self) -> TaskResult {
        match (&self.failure, self.skipped, self.state) {
            (Some(f), _, _) if f.phase == Phase::Pre => TaskResult::ErrorPre,
            (Some(_), _, _) => TaskResult::ErrorPost,
            (None, true, _) => TaskResult::Skipped,
            (None, false, TaskState::PostSigned) => TaskResult::DoneAndSaved,
            (None, false, _) => TaskResult::Skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskState; 5] = [
        TaskState::New,
        TaskState::PreSigned,
        TaskState::Signed,
        TaskState::PostSigned,
        TaskState::Failed,
    ];

    #[test]
    fn test_transition_table() {
        let allowed = [
            (TaskState::New, TaskState::PreSigned),
            (TaskState::PreSigned, TaskState::Signed),
            (TaskState::Signed, TaskState::PostSigned),
            (TaskState::New, TaskState::Failed),
            (TaskState::PreSigned, TaskState::Failed),
            (TaskState::Signed, TaskState::Failed),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(from.can_move_to(to), allowed.contains(&(from, to)), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_invalid_transition_is_an_error() {
        let mut task = SignTask::new("1");
        match task.transition(TaskState::PostSigned) {
            Err(Error::InvalidState { from, to }) => {
                assert_eq!(from, "NEW");
                assert_eq!(to, "POST_SIGNED");
            },
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(task.state(), TaskState::New);
    }

    #[test]
    fn test_failure_records_phase_and_category() {
        let mut task = SignTask::new("1");
        task.transition(TaskState::PreSigned).unwrap();
        task.fail(Phase::Post, &Error::TimestampUnavailable("TSA down".into()));
        assert_eq!(task.state(), TaskState::Failed);
        let failure = task.failure().unwrap();
        assert_eq!(failure.category, ErrorCategory::Network);
        assert!(failure.description.contains("TSA down"));
        assert_eq!(task.result(), TaskResult::ErrorPost);

        // A terminal task keeps its first outcome
        task.fail(Phase::Pre, &Error::BadPassword);
        assert_eq!(task.failure().unwrap().phase, Phase::Post);
    }

    #[test]
    fn test_results() {
        let mut pre = SignTask::new("a");
        pre.fail(Phase::Pre, &Error::InvalidBatch("x".into()));
        assert_eq!(pre.result(), TaskResult::ErrorPre);
        assert!(!pre.is_active());

        let mut skipped = SignTask::new("b");
        skipped.transition(TaskState::PreSigned).unwrap();
        assert!(!skipped.is_skipped());
        skipped.skip();
        assert!(skipped.is_skipped());
        assert_eq!(skipped.result(), TaskResult::Skipped);
        assert!(!skipped.is_active());

        let mut done = SignTask::new("c");
        done.transition(TaskState::PreSigned).unwrap();
        done.transition(TaskState::Signed).unwrap();
        done.post_signed(b"%PDF".to_vec()).unwrap();
        assert_eq!(done.result(), TaskResult::DoneAndSaved);
        assert_eq!(done.output(), Some(&b"%PDF"[..]));
        assert!(!done.is_active());

        // A finished task is not rolled back by a later stop
        done.skip();
        assert!(!done.is_skipped());
        assert_eq!(done.state(), TaskState::PostSigned);
        assert_eq!(done.result(), TaskResult::DoneAndSaved);
        assert_eq!(done.output(), Some(&b"%PDF"[..]));

        let json = serde_json::to_string(&TaskResult::DoneAndSaved).unwrap();
        assert_eq!(json, "\"DONE_AND_SAVED\"");
    }
}
