//! Inbound triggers.
//!
//! A trigger arrives as an event kind (the `X-GitHub-Event` header value)
//! plus a JSON payload. [`TriggerEvent::from_payload`] turns that pair into a
//! closed enum carrying only the fields the orchestrator reads.

use std::fmt;

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PatcherError, Result};
use crate::github::RepoRef;

// =============================================================================
// Event kinds
// =============================================================================

/// Event kinds the orchestrator recognises.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Issues,
    IssueComment,
    PullRequest,
    PullRequestReview,
    CheckRun,
    Installation,
    InstallationRepositories,
    Other(String),
}

impl EventKind {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "issues" => Self::Issues,
            "issue_comment" => Self::IssueComment,
            "pull_request" => Self::PullRequest,
            "pull_request_review" => Self::PullRequestReview,
            "check_run" => Self::CheckRun,
            "installation" => Self::Installation,
            "installation_repositories" => Self::InstallationRepositories,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Issues => "issues",
            Self::IssueComment => "issue_comment",
            Self::PullRequest => "pull_request",
            Self::PullRequestReview => "pull_request_review",
            Self::CheckRun => "check_run",
            Self::Installation => "installation",
            Self::InstallationRepositories => "installation_repositories",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Actions
// =============================================================================

/// `action` of an `issues` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueAction {
    Opened,
    Labeled,
    Other(String),
}

impl IssueAction {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "opened" => Self::Opened,
            "labeled" => Self::Labeled,
            other => Self::Other(other.to_string()),
        }
    }
}

/// `action` of an `issue_comment` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentAction {
    Created,
    Other(String),
}

impl CommentAction {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "created" => Self::Created,
            other => Self::Other(other.to_string()),
        }
    }
}

/// `action` of a `pull_request` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PullAction {
    Closed,
    Other(String),
}

impl PullAction {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "closed" => Self::Closed,
            other => Self::Other(other.to_string()),
        }
    }
}

/// `action` of an `installation` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationAction {
    Created,
    Deleted,
    Other(String),
}

impl InstallationAction {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "created" => Self::Created,
            "deleted" => Self::Deleted,
            other => Self::Other(other.to_string()),
        }
    }
}

/// `action` of an `installation_repositories` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoriesAction {
    Added,
    Removed,
    Other(String),
}

impl RepositoriesAction {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "added" => Self::Added,
            "removed" => Self::Removed,
            other => Self::Other(other.to_string()),
        }
    }
}

/// State of a submitted review.
///
/// Webhooks report it in lower case and the reviews API in upper case; both
/// parse to the same variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Other(String),
}

impl ReviewState {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "approved" => Self::Approved,
            "changes_requested" => Self::ChangesRequested,
            "commented" => Self::Commented,
            "dismissed" => Self::Dismissed,
            other => Self::Other(other.to_string()),
        }
    }
}

// =============================================================================
// Parsed payload fragments
// =============================================================================

/// Fields common to every payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventMeta {
    pub action: String,
    /// `owner/name`, empty for installation-level events
    pub repository: String,
    pub installation_id: u64,
    pub sender: String,
}

impl EventMeta {
    /// Parsed repository reference.
    ///
    /// # Errors
    ///
    /// Returns [`PatcherError::MalformedPayload`] when the payload had no
    /// usable repository.
    pub fn repo(&self, kind: &EventKind) -> Result<RepoRef> {
        RepoRef::parse(&self.repository)
            .map_err(|e| PatcherError::malformed(kind.as_str(), format!("{e:#}")))
    }
}

/// The issue (or pull request seen as an issue) an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueFields {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    /// Set when the issue is really a pull request
    pub is_pull_request: bool,
}

impl IssueFields {
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// A pull request as seen in `pull_request*` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullFields {
    pub number: u64,
    pub head_ref: String,
    /// Set on a `closed` event when the pull request was merged
    pub merged: bool,
}

/// A submitted review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewFields {
    pub state: ReviewState,
    pub body: String,
}

// =============================================================================
// Trigger event
// =============================================================================

/// One inbound trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    Issue {
        meta: EventMeta,
        action: IssueAction,
        issue: IssueFields,
    },
    IssueComment {
        meta: EventMeta,
        action: CommentAction,
        issue: IssueFields,
        comment_body: String,
    },
    PullRequest {
        meta: EventMeta,
        action: PullAction,
        pull: PullFields,
    },
    PullRequestReview {
        meta: EventMeta,
        pull: PullFields,
        review: ReviewFields,
    },
    /// The app was installed or uninstalled.
    Installation {
        meta: EventMeta,
        action: InstallationAction,
        /// `owner/name` of every repository the installation covers
        repositories: Vec<String>,
    },
    /// Repositories were added to or removed from an installation.
    InstallationRepositories {
        meta: EventMeta,
        action: RepositoriesAction,
        /// `owner/name` of the repositories added
        repositories: Vec<String>,
    },
    /// Recognised kind the orchestrator never acts on.
    Ignored { meta: EventMeta, kind: EventKind },
    /// Kind the orchestrator does not know.
    Unsupported { meta: EventMeta, kind: String },
}

impl TriggerEvent {
    /// Build an event from its kind and raw JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`PatcherError::MalformedPayload`] if the payload is missing
    /// an object the kind requires, such as `issue` on an `issues` event.
    pub fn from_payload(kind: &str, payload: Value) -> Result<Self> {
        let kind = EventKind::parse(kind);
        let raw: RawPayload = serde_json::from_value(payload)
            .map_err(|e| PatcherError::malformed(kind.as_str(), e.to_string()))?;
        let meta = raw.meta();
        let action = raw.action.as_str();

        let event = match kind {
            EventKind::Issues => Self::Issue {
                action: IssueAction::parse(action),
                issue: require(&kind, "issue", raw.issue)?.into(),
                meta,
            },
            EventKind::IssueComment => {
                let comment = require(&kind, "comment", raw.comment)?;
                Self::IssueComment {
                    action: CommentAction::parse(action),
                    issue: require(&kind, "issue", raw.issue)?.into(),
                    comment_body: comment.body.unwrap_or_default(),
                    meta,
                }
            }
            EventKind::PullRequest => Self::PullRequest {
                action: PullAction::parse(action),
                pull: require(&kind, "pull_request", raw.pull_request)?.into(),
                meta,
            },
            EventKind::PullRequestReview => {
                let review = require(&kind, "review", raw.review)?;
                Self::PullRequestReview {
                    pull: require(&kind, "pull_request", raw.pull_request)?.into(),
                    review: ReviewFields {
                        state: ReviewState::parse(&review.state),
                        body: review.body.unwrap_or_default(),
                    },
                    meta,
                }
            }
            EventKind::Installation => Self::Installation {
                action: InstallationAction::parse(action),
                repositories: full_names(raw.repositories),
                meta,
            },
            EventKind::InstallationRepositories => Self::InstallationRepositories {
                action: RepositoriesAction::parse(action),
                repositories: full_names(raw.repositories_added),
                meta,
            },
            EventKind::CheckRun => Self::Ignored { meta, kind },
            EventKind::Other(name) => Self::Unsupported { meta, kind: name },
        };
        Ok(event)
    }

    /// Parse the payload text first, then build the event.
    ///
    /// # Errors
    ///
    /// See [`from_payload`](Self::from_payload).
    pub fn from_json(kind: &str, payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| PatcherError::malformed(kind, format!("invalid JSON: {e}")))?;
        Self::from_payload(kind, value)
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Issue { .. } => EventKind::Issues,
            Self::IssueComment { .. } => EventKind::IssueComment,
            Self::PullRequest { .. } => EventKind::PullRequest,
            Self::PullRequestReview { .. } => EventKind::PullRequestReview,
            Self::Installation { .. } => EventKind::Installation,
            Self::InstallationRepositories { .. } => EventKind::InstallationRepositories,
            Self::Ignored { kind, .. } => kind.clone(),
            Self::Unsupported { kind, .. } => EventKind::Other(kind.clone()),
        }
    }

    #[must_use]
    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::Issue { meta, .. }
            | Self::IssueComment { meta, .. }
            | Self::PullRequest { meta, .. }
            | Self::PullRequestReview { meta, .. }
            | Self::Installation { meta, .. }
            | Self::InstallationRepositories { meta, .. }
            | Self::Ignored { meta, .. }
            | Self::Unsupported { meta, .. } => meta,
        }
    }

    /// Number of the issue or pull request the event targets, if any.
    #[must_use]
    pub fn target_number(&self) -> Option<u64> {
        match self {
            Self::Issue { issue, .. } | Self::IssueComment { issue, .. } => Some(issue.number),
            Self::PullRequest { pull, .. } | Self::PullRequestReview { pull, .. } => {
                Some(pull.number)
            }
            Self::Installation { .. }
            | Self::InstallationRepositories { .. }
            | Self::Ignored { .. }
            | Self::Unsupported { .. } => None,
        }
    }
}

fn full_names(repositories: Vec<RawRepository>) -> Vec<String> {
    repositories
        .into_iter()
        .map(|r| r.full_name)
        .filter(|name| !name.is_empty())
        .collect()
}

fn require<T>(kind: &EventKind, field: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| PatcherError::malformed(kind.as_str(), format!("missing '{field}' object")))
}

// =============================================================================
// Work-unit identity
// =============================================================================

/// What a work-unit number refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkUnitKind {
    /// Originating request (issue)
    Request,
    /// Change artifact (pull request)
    Change,
    /// Installing the review workflow into a repository
    Onboarding,
}

/// Identity of one unit of work, derived per trigger and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WorkUnitKey {
    pub repo: String,
    pub kind: WorkUnitKind,
    pub number: u64,
}

impl WorkUnitKey {
    #[must_use]
    pub fn request(repo: &RepoRef, number: u64) -> Self {
        Self {
            repo: repo.slug(),
            kind: WorkUnitKind::Request,
            number,
        }
    }

    #[must_use]
    pub fn change(repo: &RepoRef, number: u64) -> Self {
        Self {
            repo: repo.slug(),
            kind: WorkUnitKind::Change,
            number,
        }
    }

    #[must_use]
    pub fn onboarding(repo: &RepoRef) -> Self {
        Self {
            repo: repo.slug(),
            kind: WorkUnitKind::Onboarding,
            number: 0,
        }
    }
}

impl fmt::Display for WorkUnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WorkUnitKind::Request => write!(f, "{}#issue-{}", self.repo, self.number),
            WorkUnitKind::Change => write!(f, "{}#{}", self.repo, self.number),
            WorkUnitKind::Onboarding => write!(f, "{}#onboarding", self.repo),
        }
    }
}

// =============================================================================
// Raw payload shapes
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    #[serde(default)]
    action: String,
    #[serde(default)]
    repository: Option<RawRepository>,
    #[serde(default)]
    installation: Option<RawInstallation>,
    #[serde(default)]
    sender: Option<RawSender>,
    #[serde(default)]
    issue: Option<RawIssue>,
    #[serde(default)]
    comment: Option<RawComment>,
    #[serde(default)]
    pull_request: Option<RawPull>,
    #[serde(default)]
    review: Option<RawReview>,
    #[serde(default)]
    repositories: Vec<RawRepository>,
    #[serde(default)]
    repositories_added: Vec<RawRepository>,
}

impl RawPayload {
    fn meta(&self) -> EventMeta {
        EventMeta {
            action: self.action.clone(),
            repository: self
                .repository
                .as_ref()
                .map(|r| r.full_name.clone())
                .unwrap_or_default(),
            installation_id: self.installation.as_ref().map_or(0, |i| i.id),
            sender: self
                .sender
                .as_ref()
                .map(|s| s.login.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    #[serde(default)]
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct RawInstallation {
    #[serde(default)]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RawSender {
    #[serde(default)]
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<RawLabel>,
    #[serde(default)]
    pull_request: Option<IgnoredAny>,
}

impl From<RawIssue> for IssueFields {
    fn from(raw: RawIssue) -> Self {
        Self {
            number: raw.number,
            title: raw.title,
            body: raw.body.unwrap_or_default(),
            labels: raw.labels.into_iter().map(|l| l.name).collect(),
            is_pull_request: raw.pull_request.is_some(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawComment {
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHead {
    #[serde(default, rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawPull {
    number: u64,
    #[serde(default)]
    head: RawHead,
    #[serde(default)]
    merged: Option<bool>,
}

impl From<RawPull> for PullFields {
    fn from(raw: RawPull) -> Self {
        Self {
            number: raw.number,
            head_ref: raw.head.name,
            merged: raw.merged.unwrap_or(false),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawReview {
    #[serde(default)]
    state: String,
    #[serde(default)]
    body: Option<String>,
}
