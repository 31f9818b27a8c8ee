//! End-to-end control loop, invoked once per trigger.
//!
//! ```text
//! Router ─▶ Dedup guard ─▶ load record ─▶ budget check ─▶ generator
//!        ─▶ check verdict ─▶ record step ─▶ save record ─▶ release guard
//! ```
//!
//! Installation triggers take a separate path: each listed repository gets
//! a change artifact that adds the review workflow (see [`crate::onboarding`]).
//!
//! Every path ends in an [`Outcome`]. Errors from collaborators are logged
//! and turned into [`Outcome::Failed`]; nothing propagates to whoever
//! delivered the trigger.

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::checks::{CheckAggregator, CheckVerdict};
use crate::collaborator::{
    ChangeGenerator, Critique, CritiqueRequest, FileAction, GeneratedChange, GenerationRequest,
    GenerationTask,
};
use crate::config::OrchestratorConfig;
use crate::error::{IntoPatcherError, PatcherError, Result};
use crate::event::{ReviewState, TriggerEvent, WorkUnitKey};
use crate::github::{
    FileWrite, InlineComment, Issue, NewChange, RepoRef, ReviewAction, ReviewSubmission,
    SourceControl,
};
use crate::guard::DedupGuard;
use crate::iteration::{limit_notice, Budget, IterationController};
use crate::onboarding::{OnboardingKit, OnboardingResult, OnboardingStatus};
use crate::router::{AdvanceSource, Route, Router};
use crate::state::{
    self, extract_visible, merge_into_body, ProgressRecord, StateStore, StepStatus,
};

const SLUG_MAX_CHARS: usize = 40;
const REVIEW_COMMENT_WINDOW: usize = 5;
const MENTION_COMMENT_WINDOW: usize = 10;

// =============================================================================
// Outcomes
// =============================================================================

/// Structured result of processing one trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// A change artifact was opened for a request.
    Started {
        issue: u64,
        change: u64,
        url: String,
        branch: String,
        files: Vec<String>,
    },
    /// A revision step was committed and recorded.
    Advanced {
        change: u64,
        step: u32,
        iteration: u32,
        fixed_checks: bool,
        files: Vec<String>,
    },
    /// Neither failing checks nor feedback were found.
    NothingToDo { change: u64 },
    Skipped { reason: String },
    AlreadyProcessing { issue: u64 },
    BudgetExhausted { change: u64, used: u32, max: u32 },
    /// The change artifact was closed, merged or not.
    Released { change: u64, merged: bool },
    Reviewed(ReviewReport),
    /// One result per repository of an installation trigger.
    Onboarded { results: Vec<OnboardingResult> },
    Failed { error: String },
}

impl Outcome {
    fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl From<PatcherError> for Outcome {
    fn from(err: PatcherError) -> Self {
        Self::failed(err.to_string())
    }
}

/// Options for [`Orchestrator::review`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewOptions {
    /// Settle-wait for pending checks before judging them
    pub wait_for_checks: bool,
    /// Post the review on the change artifact
    pub post: bool,
}

impl Default for ReviewOptions {
    fn default() -> Self {
        Self {
            wait_for_checks: false,
            post: true,
        }
    }
}

/// Result of a review pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewReport {
    pub change: u64,
    pub approved: bool,
    pub summary: String,
    /// Own gate checks passed (no relevant check failed)
    pub checks_passed: bool,
    pub comments: Vec<InlineComment>,
    pub errors: usize,
    pub warnings: usize,
    pub posted: bool,
    pub state_updated: bool,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives requests from trigger to accepted change.
///
/// Cheap to clone: every clone shares the same guard, counters and
/// collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    router: Router,
    scm: Arc<dyn SourceControl>,
    generator: Arc<dyn ChangeGenerator>,
    store: StateStore,
    checks: CheckAggregator,
    guard: DedupGuard,
    iterations: IterationController,
}

impl Orchestrator {
    /// # Errors
    ///
    /// Returns an error if the router cannot be built from `config`.
    pub fn new(
        config: OrchestratorConfig,
        scm: Arc<dyn SourceControl>,
        generator: Arc<dyn ChangeGenerator>,
    ) -> Result<Self> {
        let router = Router::new(&config)?;
        let iterations = IterationController::new(config.max_iterations);
        Ok(Self {
            config: Arc::new(config),
            router,
            store: StateStore::new(scm.clone()),
            checks: CheckAggregator::new(scm.clone()),
            scm,
            generator,
            guard: DedupGuard::new(),
            iterations,
        })
    }

    /// Use an existing dedup guard.
    #[must_use]
    pub fn with_guard(mut self, guard: DedupGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Use an existing iteration controller.
    #[must_use]
    pub fn with_iterations(mut self, iterations: IterationController) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[must_use]
    pub fn iterations(&self) -> &IterationController {
        &self.iterations
    }

    /// Process `event` on a background task and return immediately.
    pub fn dispatch(&self, event: TriggerEvent) -> JoinHandle<Outcome> {
        let this = self.clone();
        tokio::spawn(async move { this.handle(event).await })
    }

    /// Process one trigger to completion.
    pub async fn handle(&self, event: TriggerEvent) -> Outcome {
        let kind = event.kind();
        let span = info_span!(
            "trigger",
            kind = %kind,
            repo = %event.meta().repository,
            number = event.target_number().unwrap_or_default()
        );

        async {
            let meta = event.meta();
            let route = self.router.route(&event);
            if let Route::Ignore { reason } = &route {
                info!(action = %meta.action, sender = %meta.sender, "Skipping: {reason}");
                return Outcome::Skipped {
                    reason: reason.clone(),
                };
            }
            info!(action = %meta.action, sender = %meta.sender, route = ?route, "Routed");

            if let Route::Onboard { repositories } = &route {
                return self.onboard(repositories).await;
            }

            let repo = match meta.repo(&kind) {
                Ok(repo) => repo,
                Err(e) => {
                    error!("Cannot process trigger: {e}");
                    return Outcome::from(e);
                }
            };

            match route {
                Route::Start { issue } => self.start(&repo, issue).await,
                Route::Advance { change, source } => self.advance(&repo, change, source).await,
                Route::Release { change, merged } => self.release(&repo, change, merged),
                Route::Onboard { repositories } => self.onboard(&repositories).await,
                Route::Ignore { reason } => Outcome::Skipped { reason },
            }
        }
        .instrument(span)
        .await
    }

    // =========================================================================
    // Start
    // =========================================================================

    async fn start(&self, repo: &RepoRef, issue: u64) -> Outcome {
        let Some(_permit) = self.guard.acquire(WorkUnitKey::request(repo, issue)) else {
            info!(issue, "Skipping: already processing");
            return Outcome::AlreadyProcessing { issue };
        };

        info!(issue, "Processing issue");
        match self.run_start(repo, issue).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(issue, "Failed to process issue: {e}");
                Outcome::from(e)
            }
        }
    }

    async fn run_start(&self, repo: &RepoRef, number: u64) -> Result<Outcome> {
        let issue = self
            .scm
            .get_issue(repo, number)
            .await
            .into_source_control("get_issue")?;

        let generated = self
            .generator
            .generate(&GenerationRequest {
                issue: issue.clone(),
                change: None,
                task: GenerationTask::Implement,
            })
            .await
            .into_collaborator("generate")?;
        if generated.is_empty() {
            let error = empty_generation_error("Code generation", &generated);
            error!(issue = number, "{error}");
            return Ok(Outcome::failed(error));
        }

        let base = match &self.config.base_branch {
            Some(base) => base.clone(),
            None => self
                .scm
                .default_branch(repo)
                .await
                .into_source_control("default_branch")?,
        };
        let branch = branch_name(&self.config.branch_prefix, &issue);
        info!(%branch, %base, "Creating branch");
        self.scm
            .create_branch(repo, &branch, &base)
            .await
            .into_source_control("create_branch")?;

        let commit = self
            .scm
            .commit_files(
                repo,
                &branch,
                &file_writes(&generated),
                &format!("feat: {}\n\nResolves #{}", issue.title, issue.number),
            )
            .await
            .into_source_control("commit_files")?;

        let mut record = ProgressRecord::new(
            issue.number,
            branch.clone(),
            state::requirements_fingerprint(&issue.body),
        );
        record
            .add_step(StepStatus::AwaitingReview, generated.paths())
            .commit_ref = Some(commit);

        let body = merge_into_body(&change_description(&issue, &generated), &record)?;
        let labels = vec![
            self.config.review_label.clone(),
            self.config.trigger_label.clone(),
        ];
        let artifact = self
            .scm
            .open_change(
                repo,
                &NewChange {
                    title: format!("feat: {}", issue.title),
                    body,
                    head: branch.clone(),
                    base,
                    labels,
                },
            )
            .await
            .into_source_control("open_change")?;

        record.change_id = Some(artifact.number);
        self.store.save(repo, artifact.number, &record).await?;

        info!(
            issue = number,
            change = artifact.number,
            url = %artifact.url,
            "Opened change"
        );
        Ok(Outcome::Started {
            issue: number,
            change: artifact.number,
            url: artifact.url,
            branch,
            files: generated.paths(),
        })
    }

    // =========================================================================
    // Advance
    // =========================================================================

    async fn advance(&self, repo: &RepoRef, change: u64, source: AdvanceSource) -> Outcome {
        let key = WorkUnitKey::change(repo, change);

        if let Budget::Exhausted { used, max } = self.iterations.check(&key) {
            return self.exhausted(repo, change, &key, used, max).await;
        }

        let record = match self.store.load(repo, change).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(change, "No progress record found");
                return Outcome::Skipped {
                    reason: "no patcher state found".to_string(),
                };
            }
            Err(e) => {
                error!(change, "Failed to load progress record: {e}");
                return Outcome::from(e);
            }
        };

        if self.config.seed_iterations_from_state {
            let count = self
                .iterations
                .seed_if_unobserved(&key, record.revision_count());
            debug!(change, count, "Revision counter in effect");
            if let Budget::Exhausted { used, max } = self.iterations.check(&key) {
                return self.exhausted(repo, change, &key, used, max).await;
            }
        }

        let iteration = self.iterations.increment(&key);
        info!(
            change,
            "Advancing (iteration {iteration}/{})",
            self.iterations.max_iterations()
        );

        match self.run_advance(repo, change, record, source, iteration).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(change, "Advance failed: {e}");
                Outcome::from(e)
            }
        }
    }

    async fn run_advance(
        &self,
        repo: &RepoRef,
        change: u64,
        mut record: ProgressRecord,
        source: AdvanceSource,
        iteration: u32,
    ) -> Result<Outcome> {
        let issue = self
            .scm
            .get_issue(repo, record.request_id)
            .await
            .into_source_control("get_issue")?;
        let step_number = record.step_count() + 1;

        let failures = self.check_failures(repo, change).await;
        let (task, feedback, check_status, message) = if failures.is_empty() {
            let feedback = match source {
                AdvanceSource::Review { feedback } if !feedback.trim().is_empty() => {
                    Some(feedback)
                }
                _ => self.scan_feedback(repo, change).await,
            };
            let Some(feedback) = feedback else {
                info!(change, "No CI failures or review feedback found");
                return Ok(Outcome::NothingToDo { change });
            };
            (
                GenerationTask::AddressFeedback {
                    feedback: feedback.clone(),
                },
                feedback,
                "passed",
                format!("fix: address review feedback\n\nIteration {step_number}"),
            )
        } else {
            info!(change, failures = failures.len(), "CI failures take priority");
            let feedback = format!("[CI Fixes]\n{}", failures.join("\n"));
            (
                GenerationTask::FixChecks { failures },
                feedback,
                "failed",
                format!("fix: resolve CI failures\n\nIteration {step_number}"),
            )
        };
        let fixed_checks = check_status == "failed";

        let generated = self
            .generator
            .generate(&GenerationRequest {
                issue,
                change: Some(change),
                task,
            })
            .await
            .into_collaborator("generate")?;
        if generated.is_empty() {
            let error = empty_generation_error("Fix generation", &generated);
            error!(change, "{error}");
            return Ok(Outcome::failed(error));
        }

        let commit = self
            .scm
            .commit_files(repo, &record.branch_name, &file_writes(&generated), &message)
            .await
            .into_source_control("commit_files")?;

        let step = record.add_step(StepStatus::AwaitingReview, generated.paths());
        step.commit_ref = Some(commit);
        step.review_feedback = Some(feedback);
        step.check_status = Some(check_status.to_string());
        let step = step.number;

        self.store.save(repo, change, &record).await?;

        info!(change, step, "Recorded revision");
        Ok(Outcome::Advanced {
            change,
            step,
            iteration,
            fixed_checks,
            files: generated.paths(),
        })
    }

    /// Failure summaries over all checks. A failed lookup counts as none.
    async fn check_failures(&self, repo: &RepoRef, change: u64) -> Vec<String> {
        let verdict = if self.config.checks.wait_before_advance {
            self.checks
                .wait_until_settled(
                    repo,
                    change,
                    self.config.checks.timeout(),
                    self.config.checks.poll_interval(),
                )
                .await
        } else {
            self.checks.fetch(repo, change).await
        };

        match verdict {
            Ok(verdict) => verdict.failure_summaries(),
            Err(e) => {
                warn!(change, "Failed to get CI status: {e}");
                Vec::new()
            }
        }
    }

    /// Latest changes-requested review body, else recent inline comments,
    /// else the latest mention comment.
    async fn scan_feedback(&self, repo: &RepoRef, change: u64) -> Option<String> {
        match self.scan_feedback_inner(repo, change).await {
            Ok(feedback) => feedback,
            Err(e) => {
                warn!(change, "Failed to read review feedback: {e:#}");
                None
            }
        }
    }

    async fn scan_feedback_inner(
        &self,
        repo: &RepoRef,
        change: u64,
    ) -> anyhow::Result<Option<String>> {
        let reviews = self.scm.list_reviews(repo, change).await?;
        if let Some(review) = reviews
            .iter()
            .rev()
            .find(|r| {
                ReviewState::parse(&r.state) == ReviewState::ChangesRequested
                    && !r.body.trim().is_empty()
            })
        {
            return Ok(Some(review.body.clone()));
        }

        let comments = self.scm.list_review_comments(repo, change).await?;
        if !comments.is_empty() {
            let start = comments.len().saturating_sub(REVIEW_COMMENT_WINDOW);
            let lines: Vec<String> = comments[start..]
                .iter()
                .map(|c| format!("- {}: {}", c.path, c.body))
                .collect();
            return Ok(Some(lines.join("\n")));
        }

        let conversation = self.scm.list_comments(repo, change).await?;
        let start = conversation.len().saturating_sub(MENTION_COMMENT_WINDOW);
        Ok(conversation[start..]
            .iter()
            .rev()
            .find(|body| self.router.is_mention(body))
            .cloned())
    }

    async fn exhausted(
        &self,
        repo: &RepoRef,
        change: u64,
        key: &WorkUnitKey,
        used: u32,
        max: u32,
    ) -> Outcome {
        warn!(change, "Reached max iterations ({used}/{max}), skipping");
        if self.iterations.mark_notified(key) {
            match self.scm.post_comment(repo, change, &limit_notice(max)).await {
                Ok(()) => info!(change, "Posted iteration limit notice"),
                Err(e) => error!(change, "Failed to post iteration limit notice: {e:#}"),
            }
        }
        Outcome::BudgetExhausted { change, used, max }
    }

    fn release(&self, repo: &RepoRef, change: u64, merged: bool) -> Outcome {
        self.iterations.reset(&WorkUnitKey::change(repo, change));
        if merged {
            info!(change, "Change merged, revision counter reset");
        } else {
            info!(change, "Change closed without merge, revision counter reset");
        }
        Outcome::Released { change, merged }
    }

    // =========================================================================
    // Onboarding
    // =========================================================================

    /// Open a workflow-installing change in every repository of `repositories`.
    /// A failure in one repository does not stop the others.
    pub async fn onboard(&self, repositories: &[String]) -> Outcome {
        let kit = OnboardingKit::new(&self.config);
        let mut results = Vec::with_capacity(repositories.len());

        for slug in repositories {
            let status = match RepoRef::parse(slug) {
                Ok(repo) => self.onboard_repository(&repo, &kit).await,
                Err(e) => OnboardingStatus::Failed {
                    error: e.to_string(),
                },
            };
            match &status {
                OnboardingStatus::Opened { change, url } => {
                    info!(repository = %slug, change, url = %url, "Opened onboarding change");
                }
                OnboardingStatus::Skipped { reason } => {
                    info!(repository = %slug, "Onboarding skipped: {reason}");
                }
                OnboardingStatus::Failed { error } => {
                    error!(repository = %slug, "Onboarding failed: {error}");
                }
            }
            results.push(OnboardingResult::new(slug.clone(), status));
        }

        Outcome::Onboarded { results }
    }

    async fn onboard_repository(&self, repo: &RepoRef, kit: &OnboardingKit) -> OnboardingStatus {
        let Some(_permit) = self.guard.acquire(WorkUnitKey::onboarding(repo)) else {
            return OnboardingStatus::Skipped {
                reason: "already processing".to_string(),
            };
        };

        match self.run_onboarding(repo, kit).await {
            Ok(status) => status,
            Err(e) => OnboardingStatus::Failed {
                error: e.to_string(),
            },
        }
    }

    async fn run_onboarding(
        &self,
        repo: &RepoRef,
        kit: &OnboardingKit,
    ) -> Result<OnboardingStatus> {
        let base = match &self.config.base_branch {
            Some(base) => base.clone(),
            None => self
                .scm
                .default_branch(repo)
                .await
                .into_source_control("default_branch")?,
        };

        if self
            .scm
            .file_exists(repo, &kit.workflow_path, &base)
            .await
            .into_source_control("file_exists")?
        {
            return Ok(OnboardingStatus::Skipped {
                reason: "workflow exists".to_string(),
            });
        }

        if let Some(change) = self
            .scm
            .find_open_change(repo, &kit.branch)
            .await
            .into_source_control("find_open_change")?
        {
            debug!(change, "Onboarding change already open");
            return Ok(OnboardingStatus::Skipped {
                reason: "onboarding PR exists".to_string(),
            });
        }

        info!(branch = %kit.branch, %base, "Creating onboarding branch");
        self.scm
            .create_branch(repo, &kit.branch, &base)
            .await
            .into_source_control("create_branch")?;
        self.scm
            .commit_files(
                repo,
                &kit.branch,
                &[FileWrite::write(&kit.workflow_path, &kit.workflow)],
                &kit.commit_message,
            )
            .await
            .into_source_control("commit_files")?;

        let artifact = self
            .scm
            .open_change(
                repo,
                &NewChange {
                    title: kit.title.clone(),
                    body: kit.body.clone(),
                    head: kit.branch.clone(),
                    base,
                    labels: kit.labels.clone(),
                },
            )
            .await
            .into_source_control("open_change")?;

        Ok(OnboardingStatus::Opened {
            change: artifact.number,
            url: artifact.url,
        })
    }

    // =========================================================================
    // Review
    // =========================================================================

    /// Critique a change artifact, judge its own checks, optionally post
    /// the review, and record the verdict on the current step.
    pub async fn review(&self, repo: &RepoRef, change: u64, options: ReviewOptions) -> Outcome {
        let span = info_span!("review", repo = %repo, number = change);
        async {
            match self.run_review(repo, change, options).await {
                Ok(report) => Outcome::Reviewed(report),
                Err(e) => {
                    error!(change, "Review failed: {e}");
                    Outcome::from(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_review(
        &self,
        repo: &RepoRef,
        change: u64,
        options: ReviewOptions,
    ) -> Result<ReviewReport> {
        let artifact = self
            .scm
            .get_change(repo, change)
            .await
            .into_source_control("get_change")?;
        let diff = self
            .scm
            .get_change_diff(repo, change)
            .await
            .into_source_control("get_change_diff")?;
        let record = state::decode(&artifact.body);

        let issue_number = record
            .as_ref()
            .map(|r| r.request_id)
            .or_else(|| referenced_issue(&artifact.body));
        let issue = match issue_number {
            Some(number) => self.related_issue(repo, number).await,
            None => None,
        };

        let verdict = if options.wait_for_checks {
            info!(change, "Waiting for CI checks to complete");
            self.checks
                .wait_until_settled(
                    repo,
                    change,
                    self.config.checks.timeout(),
                    self.config.checks.poll_interval(),
                )
                .await?
        } else {
            self.checks.fetch(repo, change).await?
        };
        let own = verdict.filter_relevant(&self.config.own_check_patterns);
        let checks_passed = own.gate_passed();

        info!(change, "Analyzing code changes");
        let critique = self
            .generator
            .critique(&CritiqueRequest {
                title: artifact.title.clone(),
                description: extract_visible(&artifact.body),
                diff,
                issue,
            })
            .await
            .into_collaborator("critique")?;

        let approved = critique.approved && checks_passed;
        let summary = review_summary(&critique, &own, approved);
        let comments = inline_comments(&critique);

        if options.post {
            let action = if approved {
                ReviewAction::Approve
            } else {
                ReviewAction::Comment
            };
            self.scm
                .post_review(
                    repo,
                    change,
                    &ReviewSubmission {
                        action,
                        body: summary.clone(),
                        comments: comments.clone(),
                    },
                )
                .await
                .into_source_control("post_review")?;
            info!(change, approved, "Posted review");
        }

        let state_updated = match record.as_ref().and_then(ProgressRecord::current_step) {
            Some(step) if step.status.is_terminal() => {
                info!(change, status = %step.status, "Current step is final, verdict not recorded");
                false
            }
            Some(_) => {
                self.record_verdict(repo, change, approved, checks_passed, &summary)
                    .await?
            }
            None => false,
        };

        Ok(ReviewReport {
            change,
            approved,
            summary,
            checks_passed,
            comments,
            errors: critique.count_severity("error"),
            warnings: critique.count_severity("warning"),
            posted: options.post,
            state_updated,
        })
    }

    async fn related_issue(&self, repo: &RepoRef, number: u64) -> Option<Issue> {
        match self.scm.get_issue(repo, number).await {
            Ok(issue) => Some(issue),
            Err(e) => {
                warn!("Could not fetch issue #{number}: {e:#}");
                None
            }
        }
    }

    /// Set the current step's status from the verdict. The record is read
    /// again from the artifact so a revision recorded meanwhile is not lost.
    async fn record_verdict(
        &self,
        repo: &RepoRef,
        change: u64,
        approved: bool,
        checks_passed: bool,
        summary: &str,
    ) -> Result<bool> {
        let status = if approved {
            StepStatus::Completed
        } else {
            StepStatus::NeedsChanges
        };
        let summary = summary.to_string();
        let check_status = if checks_passed { "passed" } else { "failed" };

        let updated = self
            .store
            .update(repo, change, move |record| {
                let step = record.set_current_status(status)?;
                step.review_feedback = Some(summary);
                step.check_status = Some(check_status.to_string());
                Ok(())
            })
            .await;

        match updated {
            Ok(_) => Ok(true),
            Err(e @ PatcherError::InvalidTransition { .. }) => {
                warn!(change, "Not recording review verdict: {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// `<prefix>issue-<n>-<slug>`, slug being the lowercase title with every run
/// of non-alphanumerics replaced by `-`, trimmed, cut to 40 characters.
#[must_use]
pub fn branch_name(prefix: &str, issue: &Issue) -> String {
    let mut slug = String::with_capacity(issue.title.len());
    let mut pending_dash = false;
    for c in issue.title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    let slug: String = slug.chars().take(SLUG_MAX_CHARS).collect();
    format!("{prefix}issue-{}-{slug}", issue.number)
}

/// Visible part of a new change artifact's description.
#[must_use]
pub fn change_description(issue: &Issue, generated: &GeneratedChange) -> String {
    let files: Vec<String> = generated
        .files
        .iter()
        .map(|f| {
            let status = match f.action {
                FileAction::Create => "added",
                FileAction::Modify => "modified",
                FileAction::Delete => "deleted",
            };
            format!("- `{}` ({status})", f.path)
        })
        .collect();
    let notes = if generated.explanation.trim().is_empty() {
        "See code changes above."
    } else {
        generated.explanation.trim()
    };

    format!(
        "## Summary\n\nResolves #{}\n\n## Changes\n\n{}\n\n## Implementation Notes\n\n{notes}\n\n---\n\
         *This PR was automatically generated by Patcher*",
        issue.number,
        files.join("\n")
    )
}

fn file_writes(generated: &GeneratedChange) -> Vec<FileWrite> {
    generated
        .files
        .iter()
        .map(|f| match f.action {
            FileAction::Delete => FileWrite::delete(&f.path),
            FileAction::Create | FileAction::Modify => FileWrite::write(&f.path, &f.content),
        })
        .collect()
}

fn empty_generation_error(stage: &str, generated: &GeneratedChange) -> String {
    let reason = generated.explanation.trim();
    if reason.is_empty() {
        format!("{stage} produced no files")
    } else {
        format!("{stage} produced no files: {reason}")
    }
}

/// Issue number from "Resolves #n", "Fixes #n" or "Closes #n".
fn referenced_issue(body: &str) -> Option<u64> {
    let pattern = Regex::new(r"(?i)\b(?:resolves?|fixes?|closes?)\s+#(\d+)").ok()?;
    pattern.captures(body)?.get(1)?.as_str().parse().ok()
}

fn inline_comments(critique: &Critique) -> Vec<InlineComment> {
    critique
        .issues
        .iter()
        .filter_map(|issue| {
            let path = issue.path.as_ref().filter(|p| !p.is_empty())?;
            let line = issue.line.filter(|l| *l > 0)?;
            Some(InlineComment {
                path: path.clone(),
                line,
                body: format!("[{}] {}", issue.severity.to_uppercase(), issue.description),
            })
        })
        .collect()
}

fn review_summary(critique: &Critique, own: &CheckVerdict, approved: bool) -> String {
    let mut parts = vec![format!("**Assessment**: {}", critique.summary)];

    if critique.requirements_met {
        parts.push("✅ Requirements met".to_string());
    } else {
        parts.push("❌ Requirements not fully met".to_string());
        if !critique.requirements_notes.is_empty() {
            parts.push(format!("   {}", critique.requirements_notes));
        }
    }

    let failures = own.failure_summaries();
    if own.checks.is_empty() {
        parts.push("✅ CI: No patcher CI checks found".to_string());
    } else if failures.is_empty() {
        parts.push("✅ CI: CI checks passed".to_string());
    } else {
        parts.push(format!(
            "❌ CI failed: {} patcher check(s) failed",
            failures.len()
        ));
        for failure in failures.iter().take(3) {
            parts.push(format!("  - {failure}"));
        }
    }

    let errors = critique.count_severity("error");
    let warnings = critique.count_severity("warning");
    if errors > 0 {
        parts.push(format!("❌ {errors} error(s) found"));
    }
    if warnings > 0 {
        parts.push(format!("⚠️ {warnings} warning(s) found"));
    }

    parts.push(if approved {
        "\n✅ **Approved for merge**".to_string()
    } else {
        "\n❌ **Changes requested**".to_string()
    });
    parts.join("\n")
}
