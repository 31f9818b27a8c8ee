//! Check-status aggregation.
//!
//! Reduces the check runs reported for a change artifact's latest revision
//! into one [`CheckVerdict`], and waits for pending checks to settle.
//!
//! # Precedence
//!
//! The verdict starts at `success` and is only ever downgraded. The first
//! `failure` or `error` seen wins over anything seen later, except that a
//! single pending check turns the whole verdict into `pending`.
//!
//! # Two views of the same checks
//!
//! - the **full** verdict is what the orchestrator uses when it decides to
//!   fix the project's own failing CI during an advance;
//! - the **relevant** verdict ([`CheckVerdict::filter_relevant`]) keeps only
//!   checks whose names match the orchestrator's own gates and is what a
//!   review pass judges.
//!
//! The two are not interchangeable: a failing project test suite blocks an
//! advance into the CI-fix path but does not by itself fail a review.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{PatcherError, Result};
use crate::github::{RepoRef, SourceControl};

/// Raw check run as reported by the check system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    /// Execution status: `queued`, `in_progress`, `completed`, ...
    pub status: String,
    /// Outcome of a completed run: `success`, `failure`, `cancelled`, ...
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

impl CheckRun {
    /// A run that has finished with `conclusion`.
    #[must_use]
    pub fn completed(name: &str, conclusion: &str) -> Self {
        Self {
            name: name.to_string(),
            status: "completed".to_string(),
            conclusion: Some(conclusion.to_string()),
            url: None,
            output: None,
        }
    }

    /// A run that has not finished yet.
    #[must_use]
    pub fn in_progress(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: "in_progress".to_string(),
            conclusion: None,
            url: None,
            output: None,
        }
    }

    #[must_use]
    pub fn with_output(mut self, output: &str) -> Self {
        self.output = Some(output.to_string());
        self
    }
}

/// Normalized state of one check, also used for the overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Pending,
    Success,
    Failure,
    Error,
    Cancelled,
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CheckState::Pending => "pending",
            CheckState::Success => "success",
            CheckState::Failure => "failure",
            CheckState::Error => "error",
            CheckState::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// Map a raw run onto its normalized state.
#[must_use]
pub fn normalize(run: &CheckRun) -> CheckState {
    if run.status != "completed" {
        return CheckState::Pending;
    }
    match run.conclusion.as_deref() {
        Some("success") => CheckState::Success,
        Some("failure") => CheckState::Failure,
        Some("cancelled" | "skipped") => CheckState::Cancelled,
        _ => CheckState::Error,
    }
}

/// Reduce individual states into the overall verdict state.
#[must_use]
pub fn aggregate<I>(states: I) -> CheckState
where
    I: IntoIterator<Item = CheckState>,
{
    let mut overall = CheckState::Success;
    let mut any_pending = false;

    for state in states {
        match state {
            CheckState::Pending => any_pending = true,
            CheckState::Failure | CheckState::Error if overall == CheckState::Success => {
                overall = state;
            }
            _ => {}
        }
    }

    if any_pending {
        CheckState::Pending
    } else {
        overall
    }
}

/// One normalized check inside a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub state: CheckState,
    pub conclusion: Option<String>,
    pub url: Option<String>,
    pub output: Option<String>,
}

impl From<&CheckRun> for CheckResult {
    fn from(run: &CheckRun) -> Self {
        Self {
            name: run.name.clone(),
            state: normalize(run),
            conclusion: run.conclusion.clone(),
            url: run.url.clone(),
            output: run.output.clone(),
        }
    }
}

/// Aggregate status over a set of checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckVerdict {
    pub status: CheckState,
    pub checks: Vec<CheckResult>,
}

impl CheckVerdict {
    /// Build a verdict from raw runs.
    #[must_use]
    pub fn from_runs(runs: &[CheckRun]) -> Self {
        Self::from_results(runs.iter().map(CheckResult::from).collect())
    }

    fn from_results(checks: Vec<CheckResult>) -> Self {
        let status = aggregate(checks.iter().map(|c| c.state));
        Self { status, checks }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.state == CheckState::Pending)
            .count()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    /// Whether any individual check failed, regardless of pending ones.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.checks.iter().any(|c| c.state == CheckState::Failure)
    }

    /// `<name>: <output>` for every failed check.
    #[must_use]
    pub fn failure_summaries(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| c.state == CheckState::Failure)
            .map(|c| format!("{}: {}", c.name, c.output.as_deref().unwrap_or("Failed")))
            .collect()
    }

    /// Gate judgment: passes unless some check failed. Pending is not a failure.
    #[must_use]
    pub fn gate_passed(&self) -> bool {
        !self.has_failures()
    }

    /// Keep only checks whose name contains one of `patterns`, ignoring case,
    /// and recompute the status over them. No matching checks means success.
    #[must_use]
    pub fn filter_relevant(&self, patterns: &[String]) -> CheckVerdict {
        let lowered: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
        let relevant = self
            .checks
            .iter()
            .filter(|check| {
                let name = check.name.to_lowercase();
                lowered.iter().any(|p| name.contains(p.as_str()))
            })
            .cloned()
            .collect();
        Self::from_results(relevant)
    }
}

/// Reads check runs through the source-control collaborator.
#[derive(Clone)]
pub struct CheckAggregator {
    scm: Arc<dyn SourceControl>,
}

impl CheckAggregator {
    #[must_use]
    pub fn new(scm: Arc<dyn SourceControl>) -> Self {
        Self { scm }
    }

    /// Fetch and aggregate the current checks of a change artifact.
    ///
    /// # Errors
    ///
    /// Returns [`PatcherError::Checks`] if the check runs cannot be listed.
    pub async fn fetch(&self, repo: &RepoRef, change: u64) -> Result<CheckVerdict> {
        let runs = self
            .scm
            .list_check_runs(repo, change)
            .await
            .map_err(|e| PatcherError::Checks {
                change,
                message: format!("{e:#}"),
            })?;
        let verdict = CheckVerdict::from_runs(&runs);
        debug!(
            change,
            status = %verdict.status,
            checks = verdict.checks.len(),
            "Fetched check status"
        );
        Ok(verdict)
    }

    /// Poll [`fetch`](Self::fetch) until nothing is pending or `timeout`
    /// elapses.
    ///
    /// On timeout the last observed verdict is returned as is, possibly
    /// still pending; callers that care must look at
    /// [`CheckVerdict::has_pending`].
    ///
    /// # Errors
    ///
    /// Returns an error if any fetch fails.
    pub async fn wait_until_settled(
        &self,
        repo: &RepoRef,
        change: u64,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<CheckVerdict> {
        let started = Instant::now();

        loop {
            let verdict = self.fetch(repo, change).await?;
            let pending = verdict.pending_count();
            if pending == 0 {
                info!(change, status = %verdict.status, "Checks settled");
                return Ok(verdict);
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!(
                    change,
                    pending,
                    "Check timeout after {}s, returning last verdict",
                    elapsed.as_secs()
                );
                return Ok(verdict);
            }

            info!(
                change,
                "Waiting for {pending} check(s)... ({}s elapsed)",
                elapsed.as_secs()
            );
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSourceControl;

    fn verdict_of(runs: &[CheckRun]) -> CheckState {
        CheckVerdict::from_runs(runs).status
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(&CheckRun::in_progress("build")), CheckState::Pending);
        assert_eq!(normalize(&CheckRun::completed("b", "success")), CheckState::Success);
        assert_eq!(normalize(&CheckRun::completed("b", "failure")), CheckState::Failure);
        assert_eq!(normalize(&CheckRun::completed("b", "cancelled")), CheckState::Cancelled);
        assert_eq!(normalize(&CheckRun::completed("b", "skipped")), CheckState::Cancelled);
        assert_eq!(normalize(&CheckRun::completed("b", "timed_out")), CheckState::Error);

        let mut queued = CheckRun::in_progress("b");
        queued.status = "queued".into();
        assert_eq!(normalize(&queued), CheckState::Pending);
    }

    #[test]
    fn test_precedence_pending_over_failure() {
        let runs = [
            CheckRun::in_progress("lint"),
            CheckRun::completed("test", "failure"),
        ];
        assert_eq!(verdict_of(&runs), CheckState::Pending);
    }

    #[test]
    fn test_precedence_failure_over_success() {
        let runs = [
            CheckRun::completed("lint", "success"),
            CheckRun::completed("test", "failure"),
        ];
        assert_eq!(verdict_of(&runs), CheckState::Failure);
    }

    #[test]
    fn test_all_success() {
        let runs = [
            CheckRun::completed("lint", "success"),
            CheckRun::completed("test", "success"),
        ];
        assert_eq!(verdict_of(&runs), CheckState::Success);
    }

    #[test]
    fn test_no_checks_is_success() {
        assert_eq!(verdict_of(&[]), CheckState::Success);
    }

    #[test]
    fn test_first_poison_wins() {
        let error_first = [
            CheckRun::completed("a", "timed_out"),
            CheckRun::completed("b", "failure"),
        ];
        assert_eq!(verdict_of(&error_first), CheckState::Error);

        let failure_first = [
            CheckRun::completed("a", "failure"),
            CheckRun::completed("b", "action_required"),
        ];
        assert_eq!(verdict_of(&failure_first), CheckState::Failure);
    }

    #[test]
    fn test_cancelled_does_not_downgrade() {
        let runs = [
            CheckRun::completed("a", "success"),
            CheckRun::completed("b", "skipped"),
        ];
        assert_eq!(verdict_of(&runs), CheckState::Success);
    }

    #[test]
    fn test_failure_summaries() {
        let verdict = CheckVerdict::from_runs(&[
            CheckRun::completed("unit-tests", "failure").with_output("3 tests failed"),
            CheckRun::completed("lint", "failure"),
            CheckRun::completed("docs", "success"),
        ]);
        assert_eq!(
            verdict.failure_summaries(),
            vec!["unit-tests: 3 tests failed".to_string(), "lint: Failed".to_string()]
        );
        assert!(verdict.has_failures());
        assert!(!verdict.gate_passed());
    }

    #[test]
    fn test_filter_relevant_ignores_project_ci() {
        let verdict = CheckVerdict::from_runs(&[
            CheckRun::completed("project / unit-tests", "failure"),
            CheckRun::completed("Patcher Review", "success"),
        ]);
        assert_eq!(verdict.status, CheckState::Failure);

        let own = verdict.filter_relevant(&["patcher".to_string(), "ai-review".to_string()]);
        assert_eq!(own.status, CheckState::Success);
        assert_eq!(own.checks.len(), 1);
        assert!(own.gate_passed());
    }

    #[test]
    fn test_filter_relevant_without_matches_is_success() {
        let verdict = CheckVerdict::from_runs(&[CheckRun::completed("build", "failure")]);
        let own = verdict.filter_relevant(&["patcher".to_string()]);
        assert!(own.checks.is_empty());
        assert_eq!(own.status, CheckState::Success);
    }

    #[test]
    fn test_pending_is_not_a_gate_failure() {
        let verdict = CheckVerdict::from_runs(&[CheckRun::in_progress("ai-review")]);
        assert_eq!(verdict.status, CheckState::Pending);
        assert!(verdict.gate_passed());
    }

    #[tokio::test]
    async fn test_fetch_wraps_errors() {
        let scm = Arc::new(MockSourceControl::new().with_check_error("rate limited"));
        let aggregator = CheckAggregator::new(scm);
        let repo = RepoRef::parse("acme/widgets").unwrap();

        let err = aggregator.fetch(&repo, 7).await.unwrap_err();
        assert!(matches!(err, PatcherError::Checks { change: 7, .. }));
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_settled_returns_once_complete() {
        let scm = Arc::new(MockSourceControl::new().with_check_sequence(vec![
            vec![CheckRun::in_progress("build")],
            vec![CheckRun::in_progress("build")],
            vec![CheckRun::completed("build", "success")],
        ]));
        let aggregator = CheckAggregator::new(scm.clone());
        let repo = RepoRef::parse("acme/widgets").unwrap();

        let verdict = aggregator
            .wait_until_settled(&repo, 7, Duration::from_secs(600), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(verdict.status, CheckState::Success);
        assert_eq!(scm.check_fetch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_settled_times_out_with_last_verdict() {
        let scm = Arc::new(
            MockSourceControl::new().with_check_runs(vec![CheckRun::in_progress("build")]),
        );
        let aggregator = CheckAggregator::new(scm.clone());
        let repo = RepoRef::parse("acme/widgets").unwrap();

        let verdict = aggregator
            .wait_until_settled(&repo, 7, Duration::from_secs(90), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(verdict.status, CheckState::Pending);
        assert!(verdict.has_pending());
        // t=0, 30, 60, 90
        assert_eq!(scm.check_fetch_count(), 4);
    }
}
