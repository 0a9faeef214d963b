//! Structured submission capture.
//!
//! The agent returns extraction results by invoking the
//! `submit_extraction_results` tool rather than emitting free-form
//! text. The capture is a one-shot slot: the transport's tool handler
//! fills it (after schema validation), the worker awaits it.
//!
//! State machine per invocation:
//!
//! ```text
//! IDLE ──(tool invoked)──► SUBMITTED ──(get_result)──► CONSUMED
//! IDLE ──(timeout)─────────► failed (NoSubmission)
//! ```

use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;

use crate::error::AgentError;
use crate::model::{is_valid_type_name, is_valid_urn};

/// A validated submission from the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Raw entity records, schema-checked but not yet parsed.
    pub entities: Vec<Value>,
    /// Submission metadata object.
    pub metadata: Value,
}

#[derive(Debug)]
enum CaptureState {
    Idle,
    Submitted(Submission),
    Consumed,
}

/// One-shot slot receiving exactly one structured submission per chunk.
#[derive(Debug)]
pub struct ResultCapture {
    state: Mutex<CaptureState>,
    notify: Notify,
}

impl Default for ResultCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCapture {
    /// Creates an idle capture.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CaptureState::Idle),
            notify: Notify::new(),
        }
    }

    /// Handles one `submit_extraction_results` tool invocation.
    ///
    /// Validates the payload against the submission schema and stores
    /// it. Returns the confirmation text the transport should relay to
    /// the agent.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SubmissionRejected`] when the payload
    /// fails the schema check or a submission was already recorded.
    /// The first valid submission always wins.
    pub fn submit(&self, payload: &Value) -> Result<String, AgentError> {
        let submission = validate_submission(payload)?;

        let mut guard = self.lock();
        match *guard {
            CaptureState::Idle => {
                let entity_count = submission.entities.len();
                let type_count = submission
                    .entities
                    .iter()
                    .filter_map(|e| e.get("@type").and_then(Value::as_str))
                    .collect::<std::collections::BTreeSet<_>>()
                    .len();
                *guard = CaptureState::Submitted(submission);
                drop(guard);
                self.notify.notify_waiters();
                Ok(format!(
                    "Successfully submitted {entity_count} entities of {type_count} types. \
                     Results recorded."
                ))
            }
            CaptureState::Submitted(_) | CaptureState::Consumed => {
                Err(AgentError::SubmissionRejected {
                    message: "a submission was already recorded for this chunk".to_string(),
                })
            }
        }
    }

    /// Waits up to `timeout` for a submission and consumes it.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NoSubmission`] when no submission arrives
    /// before the deadline.
    pub async fn get_result(&self, timeout: Duration) -> Result<Submission, AgentError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for notification before checking state, so a
            // submit landing between the check and the await cannot be
            // missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(submission) = self.try_take() {
                return Ok(submission);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // One last check: the submit may have raced the timeout
                return self.try_take().ok_or(AgentError::NoSubmission {
                    timeout_seconds: timeout.as_secs(),
                });
            }
        }
    }

    /// Consumes the submission if one is present, without waiting.
    #[must_use]
    pub fn try_take(&self) -> Option<Submission> {
        let mut guard = self.lock();
        match std::mem::replace(&mut *guard, CaptureState::Consumed) {
            CaptureState::Submitted(submission) => Some(submission),
            previous => {
                *guard = previous;
                None
            }
        }
    }

    /// Returns the capture to `Idle` for a subsequent call.
    pub fn reset(&self) {
        *self.lock() = CaptureState::Idle;
    }

    /// Whether a submission is waiting to be consumed.
    #[must_use]
    pub fn has_submission(&self) -> bool {
        matches!(*self.lock(), CaptureState::Submitted(_))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CaptureState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Validates a raw tool payload against the submission schema.
fn validate_submission(payload: &Value) -> Result<Submission, AgentError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| reject("payload must be a JSON object"))?;

    let entities = obj
        .get("entities")
        .ok_or_else(|| reject("missing required field: entities"))?
        .as_array()
        .ok_or_else(|| reject("entities must be an array"))?;

    let metadata = obj
        .get("metadata")
        .ok_or_else(|| reject("missing required field: metadata"))?;
    if !metadata.is_object() {
        return Err(reject("metadata must be an object"));
    }

    for (index, entity) in entities.iter().enumerate() {
        let record = entity
            .as_object()
            .ok_or_else(|| reject(&format!("entities[{index}] is not an object")))?;

        let id = record
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| reject(&format!("entities[{index}] missing @id")))?;
        if !is_valid_urn(id) {
            return Err(reject(&format!(
                "entities[{index}] @id '{id}' does not match urn:Type:identifier"
            )));
        }

        let entity_type = record
            .get("@type")
            .and_then(Value::as_str)
            .ok_or_else(|| reject(&format!("entities[{index}] missing @type")))?;
        if !is_valid_type_name(entity_type) {
            return Err(reject(&format!(
                "entities[{index}] @type '{entity_type}' is not a valid type name"
            )));
        }

        let name = record
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| reject(&format!("entities[{index}] missing name")))?;
        if name.is_empty() {
            return Err(reject(&format!("entities[{index}] name must be non-empty")));
        }
    }

    Ok(Submission {
        entities: entities.clone(),
        metadata: metadata.clone(),
    })
}

fn reject(message: &str) -> AgentError {
    AgentError::SubmissionRejected {
        message: message.to_string(),
    }
}
