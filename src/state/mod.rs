//! Progress record persisted inside the change artifact's description.
//!
//! A [`ProgressRecord`] tracks one request from its first accepted trigger
//! until the change artifact is closed. It is the only durable state the
//! orchestrator owns: there is no database, the record lives in a fenced block
//! of the pull request body (see [`codec`]) and is read back on every
//! advancement.
//!
//! # Invariants
//!
//! - `steps[i].number == i + 1`
//! - the current step is always the last one
//! - `updated_at` is refreshed on every append
//!
//! # Example
//!
//! ```
//! use patcher::state::{ProgressRecord, StepStatus};
//!
//! let mut record = ProgressRecord::new(42, "patcher/issue-42-fix-login", "3f2a9c0d11e4b7a8");
//! record.add_step(StepStatus::AwaitingReview, vec!["src/login.rs".to_string()]);
//!
//! assert_eq!(record.step_count(), 1);
//! assert_eq!(record.current_step().map(|s| s.number), Some(1));
//! ```

pub mod codec;
pub mod store;

pub use codec::{
    decode, encode, extract_visible, merge_into_body, STATE_MARKER_END, STATE_MARKER_START,
};
pub use store::StateStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PatcherError, Result};

/// Lifecycle label of a single step.
///
/// Serialized in `snake_case` so records written by earlier deployments keep
/// decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    AwaitingReview,
    NeedsChanges,
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::AwaitingReview => "awaiting_review",
            StepStatus::NeedsChanges => "needs_changes",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

impl StepStatus {
    /// Whether no further in-place update may follow this status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }

    /// Whether the current step may move from `self` to `next` in place.
    ///
    /// Re-applying the same status is always allowed so that redelivered
    /// triggers stay harmless. Appending a new step is not a transition and
    /// is never checked against this table.
    #[must_use]
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        use StepStatus::{AwaitingReview, Completed, Failed, InProgress, NeedsChanges, Pending};

        if self == next {
            return true;
        }
        match self {
            Pending => matches!(next, InProgress | AwaitingReview | Failed),
            InProgress => matches!(next, AwaitingReview | Failed),
            AwaitingReview => matches!(next, NeedsChanges | Completed | Failed),
            NeedsChanges => matches!(next, InProgress | Completed | Failed),
            Completed | Failed => false,
        }
    }
}

/// One revision cycle of a change artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position in [`ProgressRecord::steps`]
    pub number: u32,
    pub status: StepStatus,
    /// Paths touched by this step's commit
    #[serde(rename = "changes", default)]
    pub changed_paths: Vec<String>,
    #[serde(default)]
    pub review_feedback: Option<String>,
    /// "passed" or "failed" when checks were judged for this step
    #[serde(rename = "ci_status", default)]
    pub check_status: Option<String>,
    #[serde(rename = "commit_sha", default)]
    pub commit_ref: Option<String>,
    #[serde(with = "timestamp", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Step {
    fn new(number: u32, status: StepStatus, changed_paths: Vec<String>) -> Self {
        Self {
            number,
            status,
            changed_paths,
            review_feedback: None,
            check_status: None,
            commit_ref: None,
            timestamp: Utc::now(),
        }
    }
}

/// Durable progress of one request, embedded in its change artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Originating request (issue) number; never changes
    #[serde(rename = "issue_number")]
    pub request_id: u64,
    /// Change artifact (pull request) number, set once the artifact exists
    #[serde(rename = "pr_number", default)]
    pub change_id: Option<u64>,
    #[serde(default)]
    pub branch_name: String,
    #[serde(rename = "iterations", default)]
    pub steps: Vec<Step>,
    /// Hash of the request body at creation time.
    ///
    /// Stored for drift detection but not compared against anything yet.
    #[serde(rename = "requirements_hash", default)]
    pub requirements_fingerprint: String,
    #[serde(with = "timestamp", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Create an empty record for a freshly accepted request.
    #[must_use]
    pub fn new(
        request_id: u64,
        branch_name: impl Into<String>,
        requirements_fingerprint: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            change_id: None,
            branch_name: branch_name.into(),
            steps: Vec::new(),
            requirements_fingerprint: requirements_fingerprint.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a step numbered after the last one and return it.
    pub fn add_step(&mut self, status: StepStatus, changed_paths: Vec<String>) -> &mut Step {
        let number = self.next_step_number();
        self.steps.push(Step::new(number, status, changed_paths));
        self.updated_at = Utc::now();
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    #[must_use]
    pub fn current_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.last_mut()
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Number of revisions after the initial generation.
    #[must_use]
    pub fn revision_count(&self) -> u32 {
        u32::try_from(self.steps.len().saturating_sub(1)).unwrap_or(u32::MAX)
    }

    /// Move the current step to `status`, rejecting lifecycle violations.
    ///
    /// # Errors
    ///
    /// Returns [`PatcherError::NoSteps`] when the record is empty and
    /// [`PatcherError::InvalidTransition`] when the lifecycle forbids the move.
    pub fn set_current_status(&mut self, status: StepStatus) -> Result<&mut Step> {
        let request = self.request_id;
        let step = self
            .steps
            .last_mut()
            .ok_or(PatcherError::NoSteps { request })?;
        if !step.status.can_transition_to(status) {
            return Err(PatcherError::InvalidTransition {
                from: step.status,
                to: status,
            });
        }
        step.status = status;
        self.updated_at = Utc::now();
        let last = self.steps.len() - 1;
        Ok(&mut self.steps[last])
    }

    /// Check the numbering invariant after a decode.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.steps
            .iter()
            .enumerate()
            .all(|(i, step)| step.number as usize == i + 1)
    }

    fn next_step_number(&self) -> u32 {
        u32::try_from(self.steps.len() + 1).unwrap_or(u32::MAX)
    }
}

/// Stable fingerprint of a request body: first 16 hex chars of its SHA-256.
#[must_use]
pub fn requirements_fingerprint(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(16);
    encoded
}

/// Timestamps are written as RFC 3339 UTC; older records carry naive ISO
/// timestamps without an offset, which are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
