//! [`SourceControl`] backed by the GitHub CLI.
//!
//! Every call goes through `gh api`, so authentication is whatever `gh auth`
//! is configured with. JSON request bodies are written to the child's stdin
//! (`--input -`) instead of being passed as arguments.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use super::{
    ChangeArtifact, FileWrite, Issue, NewChange, RepoRef, ReviewSubmission, ReviewThreadComment,
    SourceControl, SubmittedReview,
};
use crate::checks::CheckRun;

/// Environment variable that overrides the `gh` binary location.
pub const ENV_GH_BIN: &str = "PATCHER_GH_BIN";

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const PAGE_SIZE: &str = "per_page=100";
const CHECK_RUNS_PER_PAGE: usize = 100;
const DIFF_ACCEPT: &str = "Accept: application/vnd.github.diff";

/// HTTP method for a `gh api` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Patch,
}

impl Method {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
        }
    }
}

/// GitHub access through the `gh` command-line tool.
#[derive(Debug, Clone)]
pub struct GhCliSourceControl {
    binary: PathBuf,
    timeout_secs: u64,
}

impl GhCliSourceControl {
    /// Locate `gh`, honoring [`ENV_GH_BIN`] before searching `PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error if the override is empty or `gh` is not installed.
    pub fn detect() -> Result<Self> {
        if let Ok(raw) = std::env::var(ENV_GH_BIN) {
            if raw.trim().is_empty() {
                bail!("{ENV_GH_BIN} is set but empty. Provide a valid gh binary path or unset it.");
            }
            return Ok(Self::with_binary(raw.trim()));
        }

        let binary = which::which("gh").context(
            "GitHub CLI `gh` was not found in PATH. Install gh and authenticate with `gh auth login`.",
        )?;
        Ok(Self::with_binary(binary))
    }

    #[must_use]
    pub fn with_binary<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Per-call timeout in seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Arguments for one `gh api` invocation.
    fn api_args(method: Method, endpoint: &str, has_body: bool, headers: &[&str]) -> Vec<String> {
        let mut args = vec![
            "api".to_string(),
            "--method".to_string(),
            method.as_str().to_string(),
        ];
        for header in headers {
            args.push("-H".to_string());
            args.push((*header).to_string());
        }
        if has_body {
            args.push("--input".to_string());
            args.push("-".to_string());
        }
        args.push(endpoint.to_string());
        args
    }

    async fn run_gh(&self, args: &[String], input: Option<String>) -> Result<String> {
        debug!("gh {}", args.join(" "));

        let mut child = AsyncCommand::new(&self.binary)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => anyhow::anyhow!(
                    "GitHub CLI `{}` was not found. Install gh and authenticate with `gh auth login`.",
                    self.binary.display()
                ),
                _ => anyhow::anyhow!(
                    "Failed to execute GitHub CLI `{}`: {e}",
                    self.binary.display()
                ),
            })?;

        if let (Some(body), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(body.as_bytes())
                .await
                .context("Failed to write request body to gh")?;
            stdin.flush().await?;
            drop(stdin);
        }

        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("gh timed out after {}s", self.timeout_secs))?
        .context("Failed to read gh output")?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }

        bail!(
            "gh {} failed: {}",
            args.last().map_or("", String::as_str),
            command_output_detail(&output)
        )
    }

    async fn api<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let args = Self::api_args(method, endpoint, body.is_some(), &[]);
        let input = body.map(|b| b.to_string());
        let stdout = self.run_gh(&args, input).await?;
        serde_json::from_str(&stdout)
            .with_context(|| format!("Unexpected response from {endpoint}"))
    }

    async fn api_unit(&self, method: Method, endpoint: &str, body: Value) -> Result<()> {
        let args = Self::api_args(method, endpoint, true, &[]);
        self.run_gh(&args, Some(body.to_string())).await?;
        Ok(())
    }

    async fn branch_sha(&self, repo: &RepoRef, branch: &str) -> Result<String> {
        let reference: ApiRef = self
            .api(
                Method::Get,
                &format!("repos/{repo}/git/ref/heads/{branch}"),
                None,
            )
            .await
            .with_context(|| format!("Branch '{branch}' not found in {repo}"))?;
        Ok(reference.object.sha)
    }

    async fn get_pull(&self, repo: &RepoRef, number: u64) -> Result<ApiPull> {
        self.api(Method::Get, &format!("repos/{repo}/pulls/{number}"), None)
            .await
    }
}

#[async_trait]
impl SourceControl for GhCliSourceControl {
    async fn get_issue(&self, repo: &RepoRef, number: u64) -> Result<Issue> {
        let issue: ApiIssue = self
            .api(Method::Get, &format!("repos/{repo}/issues/{number}"), None)
            .await?;
        Ok(issue.into())
    }

    async fn default_branch(&self, repo: &RepoRef) -> Result<String> {
        let info: ApiRepo = self.api(Method::Get, &format!("repos/{repo}"), None).await?;
        Ok(info.default_branch)
    }

    async fn file_exists(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Result<bool> {
        let endpoint = format!("repos/{repo}/contents/{path}?ref={git_ref}");
        match self.api::<Value>(Method::Get, &endpoint, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn find_open_change(&self, repo: &RepoRef, branch: &str) -> Result<Option<u64>> {
        let pulls: Vec<ApiPull> = self
            .api(
                Method::Get,
                &format!(
                    "repos/{repo}/pulls?state=open&head={}:{branch}&{PAGE_SIZE}",
                    repo.owner
                ),
                None,
            )
            .await?;
        Ok(pulls.first().map(|p| p.number))
    }

    async fn create_branch(&self, repo: &RepoRef, branch: &str, from_ref: &str) -> Result<()> {
        let sha = self.branch_sha(repo, from_ref).await?;
        let body = json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
        match self
            .api_unit(Method::Post, &format!("repos/{repo}/git/refs"), body)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_already_exists(&e) => {
                debug!(branch, "Branch already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn commit_files(
        &self,
        repo: &RepoRef,
        branch: &str,
        files: &[FileWrite],
        message: &str,
    ) -> Result<String> {
        let parent = self.branch_sha(repo, branch).await?;
        let parent_commit: ApiGitCommit = self
            .api(
                Method::Get,
                &format!("repos/{repo}/git/commits/{parent}"),
                None,
            )
            .await?;

        let tree: ApiSha = self
            .api(
                Method::Post,
                &format!("repos/{repo}/git/trees"),
                Some(tree_request(&parent_commit.tree.sha, files)),
            )
            .await?;

        let commit: ApiSha = self
            .api(
                Method::Post,
                &format!("repos/{repo}/git/commits"),
                Some(json!({ "message": message, "tree": tree.sha, "parents": [parent] })),
            )
            .await?;

        self.api_unit(
            Method::Patch,
            &format!("repos/{repo}/git/refs/heads/{branch}"),
            json!({ "sha": commit.sha }),
        )
        .await?;

        Ok(commit.sha)
    }

    async fn open_change(&self, repo: &RepoRef, change: &NewChange) -> Result<ChangeArtifact> {
        let pull: ApiPull = self
            .api(
                Method::Post,
                &format!("repos/{repo}/pulls"),
                Some(json!({
                    "title": change.title,
                    "body": change.body,
                    "head": change.head,
                    "base": change.base,
                })),
            )
            .await?;

        let mut artifact: ChangeArtifact = pull.into();
        if !change.labels.is_empty() {
            self.api_unit(
                Method::Post,
                &format!("repos/{repo}/issues/{}/labels", artifact.number),
                json!({ "labels": change.labels }),
            )
            .await?;
            artifact.labels = change.labels.clone();
        }
        Ok(artifact)
    }

    async fn get_change(&self, repo: &RepoRef, number: u64) -> Result<ChangeArtifact> {
        Ok(self.get_pull(repo, number).await?.into())
    }

    async fn update_change_body(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        self.api_unit(
            Method::Patch,
            &format!("repos/{repo}/pulls/{number}"),
            json!({ "body": body }),
        )
        .await
    }

    async fn get_change_diff(&self, repo: &RepoRef, number: u64) -> Result<String> {
        let args = Self::api_args(
            Method::Get,
            &format!("repos/{repo}/pulls/{number}"),
            false,
            &[DIFF_ACCEPT],
        );
        self.run_gh(&args, None).await
    }

    async fn list_check_runs(&self, repo: &RepoRef, number: u64) -> Result<Vec<CheckRun>> {
        let pull = self.get_pull(repo, number).await?;
        let mut runs = Vec::new();
        for page in 1.. {
            let batch: ApiCheckRuns = self
                .api(
                    Method::Get,
                    &check_runs_endpoint(repo, &pull.head.sha, page),
                    None,
                )
                .await?;
            let page_len = batch.check_runs.len();
            runs.extend(batch.check_runs.into_iter().map(CheckRun::from));
            if !needs_next_page(runs.len(), batch.total_count, page_len) {
                break;
            }
        }
        Ok(runs)
    }

    async fn post_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        self.api_unit(
            Method::Post,
            &format!("repos/{repo}/issues/{number}/comments"),
            json!({ "body": body }),
        )
        .await
    }

    async fn post_review(
        &self,
        repo: &RepoRef,
        number: u64,
        review: &ReviewSubmission,
    ) -> Result<()> {
        self.api_unit(
            Method::Post,
            &format!("repos/{repo}/pulls/{number}/reviews"),
            review_request(review),
        )
        .await
    }

    async fn list_reviews(&self, repo: &RepoRef, number: u64) -> Result<Vec<SubmittedReview>> {
        let reviews: Vec<ApiReview> = self
            .api(
                Method::Get,
                &format!("repos/{repo}/pulls/{number}/reviews?{PAGE_SIZE}"),
                None,
            )
            .await?;
        Ok(reviews
            .into_iter()
            .map(|r| SubmittedReview {
                state: r.state,
                body: r.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn list_review_comments(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<ReviewThreadComment>> {
        let comments: Vec<ApiReviewComment> = self
            .api(
                Method::Get,
                &format!("repos/{repo}/pulls/{number}/comments?{PAGE_SIZE}"),
                None,
            )
            .await?;
        Ok(comments
            .into_iter()
            .map(|c| ReviewThreadComment {
                path: c.path,
                body: c.body,
            })
            .collect())
    }

    async fn list_comments(&self, repo: &RepoRef, number: u64) -> Result<Vec<String>> {
        let comments: Vec<ApiComment> = self
            .api(
                Method::Get,
                &format!("repos/{repo}/issues/{number}/comments?{PAGE_SIZE}"),
                None,
            )
            .await?;
        Ok(comments
            .into_iter()
            .map(|c| c.body.unwrap_or_default())
            .collect())
    }
}

// =============================================================================
// Request bodies
// =============================================================================

fn check_runs_endpoint(repo: &RepoRef, sha: &str, page: u32) -> String {
    format!("repos/{repo}/commits/{sha}/check-runs?per_page={CHECK_RUNS_PER_PAGE}&page={page}")
}

/// Whether another page of check runs has to be fetched.
///
/// Stops on a short page as well, so a `total_count` that grows while paging
/// cannot loop forever.
fn needs_next_page(collected: usize, total: usize, page_len: usize) -> bool {
    collected < total && page_len == CHECK_RUNS_PER_PAGE
}

/// Tree entries for a commit. A deletion is an entry with a null `sha`.
fn tree_request(base_tree: &str, files: &[FileWrite]) -> Value {
    let entries: Vec<Value> = files
        .iter()
        .map(|f| {
            if f.delete {
                json!({
                    "path": f.path,
                    "mode": "100644",
                    "type": "blob",
                    "sha": Value::Null,
                })
            } else {
                json!({
                    "path": f.path,
                    "mode": "100644",
                    "type": "blob",
                    "content": f.content,
                })
            }
        })
        .collect();
    json!({ "base_tree": base_tree, "tree": entries })
}

fn review_request(review: &ReviewSubmission) -> Value {
    let comments: Vec<Value> = review
        .comments
        .iter()
        .map(|c| json!({ "path": c.path, "line": c.line, "side": "RIGHT", "body": c.body }))
        .collect();
    let mut body = json!({ "body": review.body, "event": review.action.api_event() });
    if !comments.is_empty() {
        body["comments"] = Value::Array(comments);
    }
    body
}

fn is_already_exists(error: &anyhow::Error) -> bool {
    format!("{error:#}").contains("Reference already exists")
}

fn is_not_found(error: &anyhow::Error) -> bool {
    let message = format!("{error:#}");
    message.contains("HTTP 404") || message.contains("Not Found")
}

fn command_output_detail(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    format!("exit status {}", output.status)
}

// =============================================================================
// Response shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    #[serde(default)]
    html_url: String,
}

impl From<ApiIssue> for Issue {
    fn from(issue: ApiIssue) -> Self {
        Self {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            url: issue.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiBranchRef {
    #[serde(rename = "ref")]
    name: String,
    #[serde(default)]
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ApiPull {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    head: ApiBranchRef,
    base: ApiBranchRef,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    #[serde(default)]
    html_url: String,
}

impl From<ApiPull> for ChangeArtifact {
    fn from(pull: ApiPull) -> Self {
        Self {
            number: pull.number,
            title: pull.title,
            body: pull.body.unwrap_or_default(),
            head_branch: pull.head.name,
            base_branch: pull.base.name,
            labels: pull.labels.into_iter().map(|l| l.name).collect(),
            url: pull.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiRepo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct ApiSha {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ApiRef {
    object: ApiSha,
}

#[derive(Debug, Deserialize)]
struct ApiGitCommit {
    tree: ApiSha,
}

#[derive(Debug, Deserialize)]
struct ApiCheckOutput {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCheckRun {
    name: String,
    status: String,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    output: Option<ApiCheckOutput>,
}

impl From<ApiCheckRun> for CheckRun {
    fn from(run: ApiCheckRun) -> Self {
        let output = run.output.and_then(|o| {
            o.summary
                .filter(|s| !s.trim().is_empty())
                .or(o.text.filter(|t| !t.trim().is_empty()))
        });
        Self {
            name: run.name,
            status: run.status,
            conclusion: run.conclusion,
            url: run.html_url,
            output,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiCheckRuns {
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    check_runs: Vec<ApiCheckRun>,
}

#[derive(Debug, Deserialize)]
struct ApiReview {
    state: String,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiReviewComment {
    path: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct ApiComment {
    #[serde(default)]
    body: Option<String>,
}
