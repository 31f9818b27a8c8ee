//! Mock implementations of the collaborator traits.
//!
//! These mocks provide controllable test doubles for GitHub, the change
//! generator and the model backend, enabling deterministic tests of the
//! whole control loop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::checks::CheckRun;
use crate::collaborator::{
    ChangeGenerator, Critique, CritiqueRequest, FileAction, FileChange, GeneratedChange,
    GenerationRequest,
};
use crate::github::{
    ChangeArtifact, FileWrite, Issue, NewChange, RepoRef, ReviewSubmission, ReviewThreadComment,
    SourceControl, SubmittedReview,
};
use crate::llm::LlmClient;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Source control
// =============================================================================

/// A commit recorded by [`MockSourceControl::commit_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub repo: String,
    pub branch: String,
    pub message: String,
    /// Paths written
    pub paths: Vec<String>,
    /// Paths removed
    pub deleted: Vec<String>,
    /// Content of each written path
    pub contents: HashMap<String, String>,
    pub sha: String,
}

#[derive(Debug)]
struct HostState {
    issues: HashMap<u64, Issue>,
    changes: HashMap<u64, ChangeArtifact>,
    diffs: HashMap<u64, String>,
    default_branch: String,
    /// Successive check listings; the last one repeats.
    check_sequence: VecDeque<Vec<CheckRun>>,
    reviews: HashMap<u64, Vec<SubmittedReview>>,
    review_comments: HashMap<u64, Vec<ReviewThreadComment>>,
    comments: HashMap<u64, Vec<String>>,
    failures: HashMap<String, String>,
    next_change: u64,
    /// `(repo, path)` present on every branch
    files: HashSet<(String, String)>,
    /// Open change numbers keyed by `(repo, head branch)`
    open_heads: HashMap<(String, String), u64>,

    branches: Vec<(String, String)>,
    commits: Vec<RecordedCommit>,
    posted_comments: Vec<(u64, String)>,
    posted_reviews: Vec<(u64, ReviewSubmission)>,
    opened_changes: Vec<NewChange>,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            issues: HashMap::new(),
            changes: HashMap::new(),
            diffs: HashMap::new(),
            default_branch: "main".to_string(),
            check_sequence: VecDeque::new(),
            reviews: HashMap::new(),
            review_comments: HashMap::new(),
            comments: HashMap::new(),
            failures: HashMap::new(),
            next_change: 100,
            files: HashSet::new(),
            open_heads: HashMap::new(),
            branches: Vec::new(),
            commits: Vec::new(),
            posted_comments: Vec::new(),
            posted_reviews: Vec::new(),
            opened_changes: Vec::new(),
        }
    }
}

/// In-memory GitHub.
///
/// Issues and change artifacts must be registered up front; looking up an
/// unknown number fails the way a 404 would. Every write is recorded and
/// can be inspected afterwards.
///
/// # Example
///
/// ```rust,ignore
/// let scm = MockSourceControl::new()
///     .with_issue(payloads::issue(3, "Add retry", "Retry failed uploads"))
///     .with_check_runs(vec![CheckRun::completed("tests", "success")]);
///
/// assert_eq!(scm.check_fetch_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MockSourceControl {
    state: Mutex<HostState>,
    check_fetches: AtomicU32,
}

impl MockSourceControl {
    /// Create a new mock with an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        lock(&self.state)
    }

    fn edit(self, f: impl FnOnce(&mut HostState)) -> Self {
        f(&mut self.state());
        self
    }

    #[must_use]
    pub fn with_issue(self, issue: Issue) -> Self {
        self.edit(|s| {
            s.issues.insert(issue.number, issue);
        })
    }

    #[must_use]
    pub fn with_change(self, change: ChangeArtifact) -> Self {
        self.edit(|s| {
            s.next_change = s.next_change.max(change.number + 1);
            s.changes.insert(change.number, change);
        })
    }

    #[must_use]
    pub fn with_diff(self, number: u64, diff: &str) -> Self {
        self.edit(|s| {
            s.diffs.insert(number, diff.to_string());
        })
    }

    /// Make `path` exist in `repo`.
    #[must_use]
    pub fn with_file(self, repo: &str, path: &str) -> Self {
        self.edit(|s| {
            s.files.insert((repo.to_string(), path.to_string()));
        })
    }

    /// Register an open change in `repo` whose head is `branch`.
    #[must_use]
    pub fn with_open_change_from(self, repo: &str, branch: &str, number: u64) -> Self {
        self.edit(|s| {
            s.open_heads
                .insert((repo.to_string(), branch.to_string()), number);
        })
    }

    #[must_use]
    pub fn with_default_branch(self, branch: &str) -> Self {
        self.edit(|s| s.default_branch = branch.to_string())
    }

    /// Report `runs` on every check listing.
    #[must_use]
    pub fn with_check_runs(self, runs: Vec<CheckRun>) -> Self {
        self.with_check_sequence(vec![runs])
    }

    /// Report each listing in turn, repeating the last one.
    #[must_use]
    pub fn with_check_sequence(self, sequence: Vec<Vec<CheckRun>>) -> Self {
        self.edit(|s| s.check_sequence = sequence.into())
    }

    /// Fail every check listing with `error`.
    #[must_use]
    pub fn with_check_error(self, error: &str) -> Self {
        self.with_failure("list_check_runs", error)
    }

    #[must_use]
    pub fn with_reviews(self, number: u64, reviews: Vec<SubmittedReview>) -> Self {
        self.edit(|s| {
            s.reviews.insert(number, reviews);
        })
    }

    #[must_use]
    pub fn with_review_comments(self, number: u64, comments: Vec<ReviewThreadComment>) -> Self {
        self.edit(|s| {
            s.review_comments.insert(number, comments);
        })
    }

    #[must_use]
    pub fn with_comments(self, number: u64, comments: &[&str]) -> Self {
        self.edit(|s| {
            s.comments
                .insert(number, comments.iter().map(ToString::to_string).collect());
        })
    }

    /// Make the named trait method fail with `error`.
    #[must_use]
    pub fn with_failure(self, operation: &str, error: &str) -> Self {
        self.edit(|s| {
            s.failures.insert(operation.to_string(), error.to_string());
        })
    }

    fn fail_if(&self, operation: &str) -> Result<()> {
        match self.state().failures.get(operation) {
            Some(error) => bail!("{operation}: {error}"),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Current description of a change artifact.
    pub fn change_body(&self, number: u64) -> Option<String> {
        self.state().changes.get(&number).map(|c| c.body.clone())
    }

    pub fn change(&self, number: u64) -> Option<ChangeArtifact> {
        self.state().changes.get(&number).cloned()
    }

    /// Branches created, as `(branch, from_ref)`.
    pub fn created_branches(&self) -> Vec<(String, String)> {
        self.state().branches.clone()
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.state().commits.clone()
    }

    pub fn opened_changes(&self) -> Vec<NewChange> {
        self.state().opened_changes.clone()
    }

    /// Plain comments posted, as `(number, body)`.
    pub fn posted_comments(&self) -> Vec<(u64, String)> {
        self.state().posted_comments.clone()
    }

    pub fn posted_reviews(&self) -> Vec<(u64, ReviewSubmission)> {
        self.state().posted_reviews.clone()
    }

    /// Get the number of times check runs were listed.
    pub fn check_fetch_count(&self) -> u32 {
        self.check_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceControl for MockSourceControl {
    async fn get_issue(&self, _repo: &RepoRef, number: u64) -> Result<Issue> {
        self.fail_if("get_issue")?;
        self.state()
            .issues
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow!("issue #{number} not found"))
    }

    async fn default_branch(&self, _repo: &RepoRef) -> Result<String> {
        self.fail_if("default_branch")?;
        Ok(self.state().default_branch.clone())
    }

    async fn file_exists(&self, repo: &RepoRef, path: &str, _git_ref: &str) -> Result<bool> {
        self.fail_if("file_exists")?;
        Ok(self
            .state()
            .files
            .contains(&(repo.slug(), path.to_string())))
    }

    async fn find_open_change(&self, repo: &RepoRef, branch: &str) -> Result<Option<u64>> {
        self.fail_if("find_open_change")?;
        Ok(self
            .state()
            .open_heads
            .get(&(repo.slug(), branch.to_string()))
            .copied())
    }

    async fn create_branch(&self, _repo: &RepoRef, branch: &str, from_ref: &str) -> Result<()> {
        self.fail_if("create_branch")?;
        self.state()
            .branches
            .push((branch.to_string(), from_ref.to_string()));
        Ok(())
    }

    async fn commit_files(
        &self,
        repo: &RepoRef,
        branch: &str,
        files: &[FileWrite],
        message: &str,
    ) -> Result<String> {
        self.fail_if("commit_files")?;
        let (deleted, written): (Vec<&FileWrite>, Vec<&FileWrite>) =
            files.iter().partition(|f| f.delete);
        let mut state = self.state();
        let sha = format!("{:040x}", state.commits.len() + 1);
        state.commits.push(RecordedCommit {
            repo: repo.slug(),
            branch: branch.to_string(),
            message: message.to_string(),
            paths: written.iter().map(|f| f.path.clone()).collect(),
            deleted: deleted.iter().map(|f| f.path.clone()).collect(),
            contents: written
                .iter()
                .map(|f| (f.path.clone(), f.content.clone()))
                .collect(),
            sha: sha.clone(),
        });
        Ok(sha)
    }

    async fn open_change(&self, repo: &RepoRef, change: &NewChange) -> Result<ChangeArtifact> {
        self.fail_if("open_change")?;
        let mut state = self.state();
        let number = state.next_change;
        state.next_change += 1;

        let artifact = ChangeArtifact {
            number,
            title: change.title.clone(),
            body: change.body.clone(),
            head_branch: change.head.clone(),
            base_branch: change.base.clone(),
            labels: change.labels.clone(),
            url: format!("https://github.com/{repo}/pull/{number}"),
        };
        state.changes.insert(number, artifact.clone());
        state
            .open_heads
            .insert((repo.slug(), change.head.clone()), number);
        state.opened_changes.push(change.clone());
        Ok(artifact)
    }

    async fn get_change(&self, _repo: &RepoRef, number: u64) -> Result<ChangeArtifact> {
        self.fail_if("get_change")?;
        self.state()
            .changes
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow!("pull request #{number} not found"))
    }

    async fn update_change_body(&self, _repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        self.fail_if("update_change_body")?;
        let mut state = self.state();
        let change = state
            .changes
            .get_mut(&number)
            .ok_or_else(|| anyhow!("pull request #{number} not found"))?;
        change.body = body.to_string();
        Ok(())
    }

    async fn get_change_diff(&self, _repo: &RepoRef, number: u64) -> Result<String> {
        self.fail_if("get_change_diff")?;
        Ok(self.state().diffs.get(&number).cloned().unwrap_or_default())
    }

    async fn list_check_runs(&self, _repo: &RepoRef, _number: u64) -> Result<Vec<CheckRun>> {
        self.check_fetches.fetch_add(1, Ordering::SeqCst);
        self.fail_if("list_check_runs")?;
        let mut state = self.state();
        let runs = if state.check_sequence.len() > 1 {
            state.check_sequence.pop_front()
        } else {
            state.check_sequence.front().cloned()
        };
        Ok(runs.unwrap_or_default())
    }

    async fn post_comment(&self, _repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        self.fail_if("post_comment")?;
        let mut state = self.state();
        state.posted_comments.push((number, body.to_string()));
        state
            .comments
            .entry(number)
            .or_default()
            .push(body.to_string());
        Ok(())
    }

    async fn post_review(
        &self,
        _repo: &RepoRef,
        number: u64,
        review: &ReviewSubmission,
    ) -> Result<()> {
        self.fail_if("post_review")?;
        self.state().posted_reviews.push((number, review.clone()));
        Ok(())
    }

    async fn list_reviews(&self, _repo: &RepoRef, number: u64) -> Result<Vec<SubmittedReview>> {
        self.fail_if("list_reviews")?;
        Ok(self.state().reviews.get(&number).cloned().unwrap_or_default())
    }

    async fn list_review_comments(
        &self,
        _repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<ReviewThreadComment>> {
        self.fail_if("list_review_comments")?;
        Ok(self
            .state()
            .review_comments
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_comments(&self, _repo: &RepoRef, number: u64) -> Result<Vec<String>> {
        self.fail_if("list_comments")?;
        Ok(self.state().comments.get(&number).cloned().unwrap_or_default())
    }
}

// =============================================================================
// Change generator
// =============================================================================

/// Mock change generator.
///
/// Thread-safe for use in async contexts. Generates one modified
/// `src/lib.rs` and approves every change unless configured otherwise.
#[derive(Debug)]
pub struct MockGenerator {
    change: GeneratedChange,
    critique: Critique,
    error: Option<String>,
    delay: Option<Duration>,
    generate_count: AtomicU32,
    critique_count: AtomicU32,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self {
            change: GeneratedChange {
                files: vec![FileChange {
                    path: "src/lib.rs".to_string(),
                    content: "// generated\n".to_string(),
                    action: FileAction::Modify,
                }],
                explanation: "Generated change".to_string(),
            },
            critique: Critique {
                approved: true,
                issues: Vec::new(),
                summary: "Looks good".to_string(),
                requirements_met: true,
                requirements_notes: String::new(),
            },
            error: None,
            delay: None,
            generate_count: AtomicU32::new(0),
            critique_count: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the given paths as modified files.
    #[must_use]
    pub fn with_files(mut self, paths: &[&str]) -> Self {
        self.change.files = paths
            .iter()
            .map(|p| FileChange {
                path: (*p).to_string(),
                content: format!("// {p}\n"),
                action: FileAction::Modify,
            })
            .collect();
        self
    }

    #[must_use]
    pub fn with_change(mut self, change: GeneratedChange) -> Self {
        self.change = change;
        self
    }

    #[must_use]
    pub fn with_critique(mut self, critique: Critique) -> Self {
        self.critique = critique;
        self
    }

    /// Configure the mock to return an error.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Sleep for `delay` inside every generation.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn generate_count(&self) -> u32 {
        self.generate_count.load(Ordering::SeqCst)
    }

    pub fn critique_count(&self) -> u32 {
        self.critique_count.load(Ordering::SeqCst)
    }

    /// The most recent generation request.
    pub fn last_request(&self) -> Option<GenerationRequest> {
        lock(&self.requests).last().cloned()
    }
}

#[async_trait]
impl ChangeGenerator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedChange> {
        self.generate_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.error {
            Some(error) => bail!("{error}"),
            None => Ok(self.change.clone()),
        }
    }

    async fn critique(&self, _request: &CritiqueRequest) -> Result<Critique> {
        self.critique_count.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(error) => bail!("{error}"),
            None => Ok(self.critique.clone()),
        }
    }
}

// =============================================================================
// LLM client
// =============================================================================

/// Mock model backend returning a canned response.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    response: String,
    error: Option<String>,
    call_count: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response text.
    #[must_use]
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to return an error.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Get the number of times run_prompt was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        lock(&self.prompts).last().cloned()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn run_prompt(&self, prompt: &str) -> Result<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(prompt.to_string());
        match &self.error {
            Some(error) => bail!("{error}"),
            None => Ok(self.response.clone()),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
