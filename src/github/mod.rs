//! Source-control collaborator.
//!
//! The orchestrator talks to the code host only through [`SourceControl`].
//! The production implementation shells out to the GitHub CLI
//! ([`GhCliSourceControl`]); tests use
//! [`MockSourceControl`](crate::testing::MockSourceControl).

pub mod gh_cli;

pub use gh_cli::GhCliSourceControl;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checks::CheckRun;

/// `owner/name` repository reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse an `owner/name` slug.
    ///
    /// # Errors
    ///
    /// Returns an error unless `raw` has exactly two non-empty segments.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let Some((owner, name)) = trimmed.split_once('/') else {
            bail!("invalid repository '{raw}', expected owner/repo");
        };
        let (owner, name) = (owner.trim(), name.trim());
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            bail!("invalid repository '{raw}', expected owner/repo");
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// An originating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub url: String,
}

/// A change artifact (pull request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeArtifact {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
    pub labels: Vec<String>,
    pub url: String,
}

/// Request to open a change artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChange {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub labels: Vec<String>,
}

/// One file written or removed by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWrite {
    pub path: String,
    /// Ignored when `delete` is set
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub delete: bool,
}

impl FileWrite {
    #[must_use]
    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            delete: false,
        }
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: String::new(),
            delete: true,
        }
    }
}

/// Verdict attached to a posted review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewAction {
    Approve,
    Comment,
    RequestChanges,
}

impl ReviewAction {
    /// Value of the `event` field in the reviews API.
    #[must_use]
    pub const fn api_event(self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Comment => "COMMENT",
            Self::RequestChanges => "REQUEST_CHANGES",
        }
    }
}

/// Inline review comment anchored to a file line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineComment {
    pub path: String,
    pub line: u32,
    pub body: String,
}

/// A review to post on a change artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSubmission {
    pub action: ReviewAction,
    pub body: String,
    pub comments: Vec<InlineComment>,
}

/// A review already submitted on a change artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedReview {
    /// Upper-case review state as reported by the host, e.g. `CHANGES_REQUESTED`
    pub state: String,
    #[serde(default)]
    pub body: String,
}

/// A comment in a review thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewThreadComment {
    pub path: String,
    pub body: String,
}

/// Abstraction over the code host.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// trigger processed in the process.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Fetch an issue.
    async fn get_issue(&self, repo: &RepoRef, number: u64) -> Result<Issue>;

    /// Name of the repository's default branch.
    async fn default_branch(&self, repo: &RepoRef) -> Result<String>;

    /// Whether `path` exists in the repository at `git_ref`.
    async fn file_exists(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Result<bool>;

    /// Number of the open change artifact whose head is `branch`, if any.
    async fn find_open_change(&self, repo: &RepoRef, branch: &str) -> Result<Option<u64>>;

    /// Create `branch` pointing at `from_ref`. Succeeds if it already exists.
    async fn create_branch(&self, repo: &RepoRef, branch: &str, from_ref: &str) -> Result<()>;

    /// Commit `files` on top of `branch` as a single commit. Entries with
    /// `delete` set remove their path.
    ///
    /// Returns the new commit SHA.
    async fn commit_files(
        &self,
        repo: &RepoRef,
        branch: &str,
        files: &[FileWrite],
        message: &str,
    ) -> Result<String>;

    /// Open a change artifact and apply its labels.
    async fn open_change(&self, repo: &RepoRef, change: &NewChange) -> Result<ChangeArtifact>;

    /// Fetch a change artifact, description included.
    async fn get_change(&self, repo: &RepoRef, number: u64) -> Result<ChangeArtifact>;

    /// Overwrite a change artifact's description.
    async fn update_change_body(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()>;

    /// Unified diff of a change artifact.
    async fn get_change_diff(&self, repo: &RepoRef, number: u64) -> Result<String>;

    /// Check runs reported for the artifact's latest revision.
    async fn list_check_runs(&self, repo: &RepoRef, number: u64) -> Result<Vec<CheckRun>>;

    /// Post a plain comment on an issue or change artifact.
    async fn post_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()>;

    /// Post a review with optional inline comments.
    async fn post_review(
        &self,
        repo: &RepoRef,
        number: u64,
        review: &ReviewSubmission,
    ) -> Result<()>;

    /// Reviews submitted on a change artifact, oldest first.
    async fn list_reviews(&self, repo: &RepoRef, number: u64) -> Result<Vec<SubmittedReview>>;

    /// Review-thread comments on a change artifact, oldest first.
    async fn list_review_comments(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<ReviewThreadComment>>;

    /// Bodies of the conversation comments on an issue or change, oldest first.
    async fn list_comments(&self, repo: &RepoRef, number: u64) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_ref_parse() {
        let repo = RepoRef::parse(" acme/widgets ").unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.name, "widgets");
        assert_eq!(repo.to_string(), "acme/widgets");
        assert_eq!(repo.slug(), "acme/widgets");
    }

    #[test]
    fn test_repo_ref_parse_rejects_bad_slugs() {
        assert!(RepoRef::parse("widgets").is_err());
        assert!(RepoRef::parse("/widgets").is_err());
        assert!(RepoRef::parse("acme/").is_err());
        assert!(RepoRef::parse("acme/widgets/extra").is_err());
    }

    #[test]
    fn test_file_write_constructors() {
        let write = FileWrite::write("src/lib.rs", "pub fn f() {}");
        assert!(!write.delete);
        assert_eq!(write.content, "pub fn f() {}");

        let delete = FileWrite::delete("src/old.rs");
        assert!(delete.delete);
        assert!(delete.content.is_empty());

        let parsed: FileWrite = serde_json::from_str(r#"{"path": "a.rs", "content": "x"}"#).unwrap();
        assert_eq!(parsed, FileWrite::write("a.rs", "x"));
    }

    #[test]
    fn test_review_action_api_event() {
        assert_eq!(ReviewAction::Approve.api_event(), "APPROVE");
        assert_eq!(ReviewAction::Comment.api_event(), "COMMENT");
        assert_eq!(ReviewAction::RequestChanges.api_event(), "REQUEST_CHANGES");
    }
}
