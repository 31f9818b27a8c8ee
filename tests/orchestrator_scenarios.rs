//! End-to-end scenarios for the orchestrator against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use patcher::collaborator::{Critique, CritiqueIssue, FileAction, FileChange, GenerationTask};
use patcher::github::{ReviewAction, ReviewThreadComment, SubmittedReview};
use patcher::state::{decode, merge_into_body};
use patcher::testing::{payloads, MockGenerator, MockSourceControl};
use patcher::{
    ChangeArtifact, CheckRun, DedupGuard, GeneratedChange, OnboardingResult, OnboardingStatus,
    Orchestrator, OrchestratorConfig, Outcome, ProgressRecord, RepoRef, ReviewOptions, StepStatus,
    TriggerEvent, WorkUnitKey,
};

// =============================================================================
// Helpers
// =============================================================================

fn repo() -> RepoRef {
    RepoRef::parse(payloads::REPO).unwrap()
}

fn orchestrator(
    scm: &Arc<MockSourceControl>,
    generator: &Arc<MockGenerator>,
    config: OrchestratorConfig,
) -> Orchestrator {
    Orchestrator::new(config, scm.clone(), generator.clone()).unwrap()
}

fn event(kind: &str, payload: serde_json::Value) -> TriggerEvent {
    TriggerEvent::from_payload(kind, payload).unwrap()
}

fn labeled_issue(number: u64) -> TriggerEvent {
    event(
        "issues",
        payloads::issue_event("labeled", number, &["patcher"]),
    )
}

fn mention(change: u64) -> TriggerEvent {
    event(
        "issue_comment",
        payloads::comment_event("created", change, true, &["ai-review"], "@patcher fix"),
    )
}

/// Change artifact #`number` carrying a record with `steps` steps.
fn tracked_change(number: u64, steps: usize) -> ChangeArtifact {
    let mut record = ProgressRecord::new(3, "patcher/issue-3-add-retry-on-upload", "f00d");
    record.change_id = Some(number);
    for _ in 0..steps {
        record.add_step(StepStatus::AwaitingReview, vec!["src/upload.rs".into()]);
    }
    let body = merge_into_body("## Summary\n\nResolves #3", &record).unwrap();
    payloads::change(number, &body)
}

fn record_of(scm: &MockSourceControl, change: u64) -> ProgressRecord {
    decode(&scm.change_body(change).unwrap()).unwrap()
}

fn base_scm() -> MockSourceControl {
    MockSourceControl::new().with_issue(payloads::issue(
        3,
        "Add retry on upload",
        "Uploads fail on flaky networks",
    ))
}

fn changes_requested(body: &str) -> SubmittedReview {
    SubmittedReview {
        state: "CHANGES_REQUESTED".into(),
        body: body.into(),
    }
}

// =============================================================================
// Start
// =============================================================================

#[tokio::test]
async fn test_labeled_issue_opens_change_with_record() {
    let scm = Arc::new(base_scm().with_default_branch("develop"));
    let generator = Arc::new(MockGenerator::new().with_files(&["src/upload.rs"]));
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch.handle(labeled_issue(3)).await;

    let Outcome::Started {
        issue,
        change,
        branch,
        files,
        ..
    } = outcome
    else {
        panic!("expected started, got {outcome:?}");
    };
    assert_eq!(issue, 3);
    assert_eq!(branch, "patcher/issue-3-add-retry-on-upload");
    assert_eq!(files, vec!["src/upload.rs"]);

    assert_eq!(
        scm.created_branches(),
        vec![(branch.clone(), "develop".to_string())]
    );
    let commits = scm.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].message, "feat: Add retry on upload\n\nResolves #3");

    let opened = &scm.opened_changes()[0];
    assert_eq!(opened.title, "feat: Add retry on upload");
    assert_eq!(opened.base, "develop");
    assert_eq!(opened.labels, vec!["ai-review", "patcher"]);

    let record = record_of(&scm, change);
    assert_eq!(record.request_id, 3);
    assert_eq!(record.change_id, Some(change));
    assert_eq!(record.branch_name, branch);
    assert_eq!(record.steps.len(), 1);
    let step = &record.steps[0];
    assert_eq!(step.number, 1);
    assert_eq!(step.status, StepStatus::AwaitingReview);
    assert_eq!(step.commit_ref.as_deref(), Some(commits[0].sha.as_str()));

    let body = scm.change_body(change).unwrap();
    assert!(body.starts_with("## Summary\n\nResolves #3"));
    assert!(body.contains("- `src/upload.rs` (modified)"));
}

#[tokio::test]
async fn test_deleted_files_are_committed_as_deletions() {
    let scm = Arc::new(base_scm());
    let generator = Arc::new(MockGenerator::new().with_change(GeneratedChange {
        files: vec![
            FileChange {
                path: "src/upload.rs".into(),
                content: "pub fn upload() {}\n".into(),
                action: FileAction::Modify,
            },
            FileChange {
                path: "src/legacy_upload.rs".into(),
                content: String::new(),
                action: FileAction::Delete,
            },
        ],
        explanation: "Replace the legacy uploader".into(),
    }));
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let Outcome::Started { change, files, .. } = orch.handle(labeled_issue(3)).await else {
        panic!("expected started");
    };

    assert_eq!(files, vec!["src/upload.rs", "src/legacy_upload.rs"]);
    let commit = &scm.commits()[0];
    assert_eq!(commit.paths, vec!["src/upload.rs"]);
    assert_eq!(commit.deleted, vec!["src/legacy_upload.rs"]);

    let record = record_of(&scm, change);
    assert_eq!(
        record.steps[0].changed_paths,
        vec!["src/upload.rs", "src/legacy_upload.rs"]
    );
    assert!(scm
        .change_body(change)
        .unwrap()
        .contains("- `src/legacy_upload.rs` (deleted)"));
}

#[tokio::test]
async fn test_configured_base_branch_wins() {
    let scm = Arc::new(base_scm().with_failure("default_branch", "should not be asked"));
    let generator = Arc::new(MockGenerator::new());
    let config = OrchestratorConfig {
        base_branch: Some("release".into()),
        ..OrchestratorConfig::default()
    };

    let outcome = orchestrator(&scm, &generator, config)
        .handle(labeled_issue(3))
        .await;

    assert!(matches!(outcome, Outcome::Started { .. }), "{outcome:?}");
    assert_eq!(scm.created_branches()[0].1, "release");
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_delivery_starts_once() {
    let scm = Arc::new(base_scm());
    let generator = Arc::new(MockGenerator::new().with_delay(Duration::from_secs(5)));
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let opened = orch.dispatch(event(
        "issues",
        payloads::issue_event("opened", 3, &["patcher"]),
    ));
    let labeled = orch.dispatch(labeled_issue(3));

    let first = opened.await.unwrap();
    let second = labeled.await.unwrap();

    assert!(matches!(first, Outcome::Started { .. }), "{first:?}");
    assert_eq!(second, Outcome::AlreadyProcessing { issue: 3 });
    assert_eq!(generator.generate_count(), 1);
    assert_eq!(scm.opened_changes().len(), 1);
}

#[tokio::test]
async fn test_guard_released_after_failure() {
    let scm = Arc::new(base_scm().with_failure("create_branch", "403 Resource not accessible"));
    let generator = Arc::new(MockGenerator::new());
    let guard = DedupGuard::new();
    let orch =
        orchestrator(&scm, &generator, OrchestratorConfig::default()).with_guard(guard.clone());

    let outcome = orch.handle(labeled_issue(3)).await;

    let Outcome::Failed { error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(error.contains("create_branch"));
    assert!(error.contains("403"));
    assert!(!guard.is_held(&WorkUnitKey::request(&repo(), 3)));
    assert!(scm.opened_changes().is_empty());
}

#[tokio::test]
async fn test_empty_generation_fails_without_side_effects() {
    let scm = Arc::new(base_scm());
    let generator = Arc::new(MockGenerator::new().with_change(
        patcher::collaborator::GeneratedChange::failed("Code generation failed: rate limited"),
    ));
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch.handle(labeled_issue(3)).await;

    assert!(outcome.is_failure());
    assert!(scm.created_branches().is_empty());
    assert!(scm.commits().is_empty());
}

#[tokio::test]
async fn test_generator_error_is_reported() {
    let scm = Arc::new(base_scm());
    let generator = Arc::new(MockGenerator::new().with_error("claude not found"));
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let Outcome::Failed { error } = orch.handle(labeled_issue(3)).await else {
        panic!("expected failure");
    };
    assert!(error.contains("claude not found"));
}

#[tokio::test]
async fn test_unlabeled_issue_is_skipped() {
    let scm = Arc::new(base_scm());
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch
        .handle(event("issues", payloads::issue_event("opened", 3, &["bug"])))
        .await;

    assert_eq!(
        outcome,
        Outcome::Skipped {
            reason: "missing patcher label".into()
        }
    );
    assert_eq!(generator.generate_count(), 0);
}

// =============================================================================
// Advance
// =============================================================================

#[tokio::test]
async fn test_mention_addresses_review_feedback() {
    let scm = Arc::new(
        base_scm()
            .with_change(tracked_change(12, 1))
            .with_reviews(
                12,
                vec![
                    changes_requested("Old feedback"),
                    changes_requested("Handle empty input"),
                    SubmittedReview {
                        state: "COMMENTED".into(),
                        body: "nit".into(),
                    },
                ],
            ),
    );
    let generator = Arc::new(MockGenerator::new().with_files(&["src/upload.rs"]));
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch.handle(mention(12)).await;

    assert_eq!(
        outcome,
        Outcome::Advanced {
            change: 12,
            step: 2,
            iteration: 1,
            fixed_checks: false,
            files: vec!["src/upload.rs".into()],
        }
    );

    let request = generator.last_request().unwrap();
    assert_eq!(request.change, Some(12));
    assert_eq!(
        request.task,
        GenerationTask::AddressFeedback {
            feedback: "Handle empty input".into()
        }
    );

    let commit = scm.commits().pop().unwrap();
    assert_eq!(commit.branch, "patcher/issue-3-add-retry-on-upload");
    assert_eq!(commit.message, "fix: address review feedback\n\nIteration 2");

    let record = record_of(&scm, 12);
    assert_eq!(record.steps.len(), 2);
    let step = record.current_step().unwrap();
    assert_eq!(step.number, 2);
    assert_eq!(step.status, StepStatus::AwaitingReview);
    assert_eq!(step.review_feedback.as_deref(), Some("Handle empty input"));
    assert_eq!(step.check_status.as_deref(), Some("passed"));
    assert_eq!(step.commit_ref.as_deref(), Some(commit.sha.as_str()));
    assert!(scm.change_body(12).unwrap().starts_with("## Summary\n\nResolves #3"));
}

#[tokio::test]
async fn test_failing_checks_take_priority_over_feedback() {
    let scm = Arc::new(
        base_scm()
            .with_change(tracked_change(12, 1))
            .with_reviews(12, vec![changes_requested("Rename the helper")])
            .with_check_runs(vec![
                CheckRun::completed("unit-tests", "failure").with_output("2 tests failed"),
                CheckRun::completed("lint", "success"),
            ]),
    );
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch.handle(mention(12)).await;

    assert!(
        matches!(outcome, Outcome::Advanced { fixed_checks: true, step: 2, .. }),
        "{outcome:?}"
    );
    assert_eq!(
        generator.last_request().unwrap().task,
        GenerationTask::FixChecks {
            failures: vec!["unit-tests: 2 tests failed".into()]
        }
    );
    assert_eq!(
        scm.commits()[0].message,
        "fix: resolve CI failures\n\nIteration 2"
    );

    let step = record_of(&scm, 12).current_step().cloned().unwrap();
    assert_eq!(
        step.review_feedback.as_deref(),
        Some("[CI Fixes]\nunit-tests: 2 tests failed")
    );
    assert_eq!(step.check_status.as_deref(), Some("failed"));
}

#[tokio::test]
async fn test_check_lookup_failure_falls_back_to_feedback() {
    let scm = Arc::new(
        base_scm()
            .with_change(tracked_change(12, 1))
            .with_reviews(12, vec![changes_requested("Rename the helper")])
            .with_check_error("502 Bad Gateway"),
    );
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch.handle(mention(12)).await;

    assert!(
        matches!(outcome, Outcome::Advanced { fixed_checks: false, .. }),
        "{outcome:?}"
    );
}

#[tokio::test]
async fn test_review_comments_used_when_no_review_body() {
    let comments: Vec<ReviewThreadComment> = (1..=7)
        .map(|i| ReviewThreadComment {
            path: format!("src/f{i}.rs"),
            body: format!("comment {i}"),
        })
        .collect();
    let scm = Arc::new(
        base_scm()
            .with_change(tracked_change(12, 1))
            .with_reviews(12, vec![changes_requested("   ")])
            .with_review_comments(12, comments),
    );
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    orch.handle(mention(12)).await;

    let GenerationTask::AddressFeedback { feedback } = generator.last_request().unwrap().task
    else {
        panic!("expected feedback task");
    };
    assert_eq!(
        feedback,
        "- src/f3.rs: comment 3\n- src/f4.rs: comment 4\n- src/f5.rs: comment 5\n\
         - src/f6.rs: comment 6\n- src/f7.rs: comment 7"
    );
}

#[tokio::test]
async fn test_latest_mention_comment_is_last_resort() {
    let scm = Arc::new(base_scm().with_change(tracked_change(12, 1)).with_comments(
        12,
        &[
            "@patcher fix the typo",
            "unrelated chatter",
            "@patcher please add tests",
            "thanks!",
        ],
    ));
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    orch.handle(mention(12)).await;

    assert_eq!(
        generator.last_request().unwrap().task,
        GenerationTask::AddressFeedback {
            feedback: "@patcher please add tests".into()
        }
    );
}

#[tokio::test]
async fn test_nothing_to_do_without_feedback_or_failures() {
    let scm = Arc::new(
        base_scm()
            .with_change(tracked_change(12, 1))
            .with_check_runs(vec![CheckRun::completed("unit-tests", "success")]),
    );
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch.handle(mention(12)).await;

    assert_eq!(outcome, Outcome::NothingToDo { change: 12 });
    assert_eq!(generator.generate_count(), 0);
    assert!(scm.commits().is_empty());
    assert_eq!(record_of(&scm, 12).steps.len(), 1);
}

#[tokio::test]
async fn test_changes_requested_review_uses_its_body() {
    let scm = Arc::new(base_scm().with_change(tracked_change(12, 1)));
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch
        .handle(event(
            "pull_request_review",
            payloads::review_event(
                12,
                "patcher/issue-3-add-retry-on-upload",
                "changes_requested",
                "Use exponential backoff",
            ),
        ))
        .await;

    assert!(matches!(outcome, Outcome::Advanced { .. }), "{outcome:?}");
    assert_eq!(
        generator.last_request().unwrap().task,
        GenerationTask::AddressFeedback {
            feedback: "Use exponential backoff".into()
        }
    );
}

#[tokio::test]
async fn test_missing_record_is_skipped() {
    let scm = Arc::new(base_scm().with_change(payloads::change(12, "Hand-written PR")));
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch.handle(mention(12)).await;

    assert_eq!(
        outcome,
        Outcome::Skipped {
            reason: "no patcher state found".into()
        }
    );
    assert_eq!(generator.generate_count(), 0);
    assert_eq!(scm.change_body(12).unwrap(), "Hand-written PR");
}

// =============================================================================
// Budget
// =============================================================================

#[tokio::test]
async fn test_budget_seeded_from_record_is_exhausted() {
    let scm = Arc::new(
        base_scm()
            .with_change(tracked_change(12, 3))
            .with_reviews(12, vec![changes_requested("More")]),
    );
    let generator = Arc::new(MockGenerator::new());
    let config = OrchestratorConfig {
        max_iterations: 2,
        ..OrchestratorConfig::default()
    };
    let orch = orchestrator(&scm, &generator, config);

    let first = orch.handle(mention(12)).await;
    let second = orch.handle(mention(12)).await;

    let exhausted = Outcome::BudgetExhausted {
        change: 12,
        used: 2,
        max: 2,
    };
    assert_eq!(first, exhausted);
    assert_eq!(second, exhausted);
    assert_eq!(generator.generate_count(), 0);

    let notices = scm.posted_comments();
    assert_eq!(notices.len(), 1, "notice is posted once");
    assert_eq!(notices[0].0, 12);
    assert!(notices[0].1.contains("Iteration limit reached"));
    assert!(notices[0].1.contains("(2)"));
}

#[tokio::test]
async fn test_in_memory_budget_counts_advances() {
    let scm = Arc::new(
        base_scm()
            .with_change(tracked_change(12, 1))
            .with_reviews(12, vec![changes_requested("More")]),
    );
    let generator = Arc::new(MockGenerator::new());
    let config = OrchestratorConfig {
        max_iterations: 2,
        seed_iterations_from_state: false,
        ..OrchestratorConfig::default()
    };
    let orch = orchestrator(&scm, &generator, config);

    for expected in 1..=2 {
        let outcome = orch.handle(mention(12)).await;
        assert!(
            matches!(outcome, Outcome::Advanced { iteration, .. } if iteration == expected),
            "{outcome:?}"
        );
    }
    let third = orch.handle(mention(12)).await;

    assert!(matches!(third, Outcome::BudgetExhausted { used: 2, max: 2, .. }));
    assert_eq!(generator.generate_count(), 2);
    assert_eq!(record_of(&scm, 12).steps.len(), 3);
}

#[tokio::test]
async fn test_notice_failure_still_reports_exhaustion() {
    let scm = Arc::new(
        base_scm()
            .with_change(tracked_change(12, 2))
            .with_failure("post_comment", "403 Forbidden"),
    );
    let generator = Arc::new(MockGenerator::new());
    let config = OrchestratorConfig {
        max_iterations: 1,
        ..OrchestratorConfig::default()
    };

    let outcome = orchestrator(&scm, &generator, config)
        .handle(mention(12))
        .await;

    assert!(matches!(outcome, Outcome::BudgetExhausted { .. }));
}

#[tokio::test]
async fn test_closing_change_resets_counter() {
    let scm = Arc::new(
        base_scm()
            .with_change(tracked_change(12, 1))
            .with_reviews(12, vec![changes_requested("More")]),
    );
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());
    let key = WorkUnitKey::change(&repo(), 12);

    orch.handle(mention(12)).await;
    assert_eq!(orch.iterations().current_count(&key), 1);

    let outcome = orch
        .handle(event(
            "pull_request",
            payloads::pull_request_event("closed", 12, "patcher/issue-3-add-retry-on-upload"),
        ))
        .await;

    assert_eq!(
        outcome,
        Outcome::Released {
            change: 12,
            merged: false
        }
    );
    assert_eq!(orch.iterations().current_count(&key), 0);
}

#[tokio::test]
async fn test_merged_change_reports_merge() {
    let scm = Arc::new(base_scm().with_change(tracked_change(12, 1)));
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch
        .handle(event(
            "pull_request",
            payloads::merged_pull_request_event(12, "patcher/issue-3-add-retry-on-upload"),
        ))
        .await;

    assert_eq!(
        outcome,
        Outcome::Released {
            change: 12,
            merged: true
        }
    );
}

// =============================================================================
// Review pass
// =============================================================================

fn review_scm(checks: Vec<CheckRun>) -> Arc<MockSourceControl> {
    Arc::new(
        base_scm()
            .with_change(tracked_change(12, 1))
            .with_diff(12, "+retry()")
            .with_check_runs(checks),
    )
}

#[tokio::test]
async fn test_review_approves_when_own_checks_pass() {
    let scm = review_scm(vec![
        CheckRun::completed("patcher-gate", "success"),
        CheckRun::completed("project / unit-tests", "failure"),
    ]);
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let Outcome::Reviewed(report) = orch.review(&repo(), 12, ReviewOptions::default()).await
    else {
        panic!("expected review report");
    };

    assert!(report.approved);
    assert!(report.checks_passed);
    assert!(report.posted);
    assert!(report.state_updated);
    assert!(report.summary.ends_with("✅ **Approved for merge**"));

    let (number, review) = scm.posted_reviews().pop().unwrap();
    assert_eq!(number, 12);
    assert_eq!(review.action, ReviewAction::Approve);

    let step = record_of(&scm, 12).current_step().cloned().unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert_eq!(step.check_status.as_deref(), Some("passed"));
    assert_eq!(step.review_feedback.as_deref(), Some(report.summary.as_str()));
}

#[tokio::test]
async fn test_review_own_check_failure_requests_changes() {
    let scm = review_scm(vec![
        CheckRun::completed("Patcher Review", "failure").with_output("lint failed")
    ]);
    let generator = Arc::new(MockGenerator::new().with_critique(Critique {
        approved: true,
        issues: vec![CritiqueIssue {
            severity: "warning".into(),
            path: Some("src/upload.rs".into()),
            line: Some(14),
            description: "retry count is unbounded".into(),
            suggestion: String::new(),
        }],
        summary: "Implements retries".into(),
        requirements_met: true,
        requirements_notes: String::new(),
    }));
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let Outcome::Reviewed(report) = orch.review(&repo(), 12, ReviewOptions::default()).await
    else {
        panic!("expected review report");
    };

    assert!(!report.approved);
    assert!(!report.checks_passed);
    assert_eq!(report.warnings, 1);
    assert!(report.summary.contains("❌ CI failed: 1 patcher check(s) failed"));
    assert!(report.summary.contains("⚠️ 1 warning(s) found"));

    let (_, review) = scm.posted_reviews().pop().unwrap();
    assert_eq!(review.action, ReviewAction::Comment);
    assert_eq!(review.comments.len(), 1);
    assert_eq!(review.comments[0].line, 14);

    let step = record_of(&scm, 12).current_step().cloned().unwrap();
    assert_eq!(step.status, StepStatus::NeedsChanges);
    assert_eq!(step.check_status.as_deref(), Some("failed"));
}

#[tokio::test]
async fn test_review_without_posting() {
    let scm = review_scm(Vec::new());
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch
        .review(
            &repo(),
            12,
            ReviewOptions {
                wait_for_checks: false,
                post: false,
            },
        )
        .await;

    let Outcome::Reviewed(report) = outcome else {
        panic!("expected review report");
    };
    assert!(!report.posted);
    assert!(report.summary.contains("✅ CI: No patcher CI checks found"));
    assert!(scm.posted_reviews().is_empty());
    assert_eq!(generator.critique_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_review_waits_for_pending_checks() {
    let scm = Arc::new(
        base_scm()
            .with_change(tracked_change(12, 1))
            .with_check_sequence(vec![
                vec![CheckRun::in_progress("patcher-gate")],
                vec![CheckRun::completed("patcher-gate", "failure")],
            ]),
    );
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch
        .review(
            &repo(),
            12,
            ReviewOptions {
                wait_for_checks: true,
                post: true,
            },
        )
        .await;

    let Outcome::Reviewed(report) = outcome else {
        panic!("expected review report");
    };
    assert!(!report.checks_passed);
    assert_eq!(scm.check_fetch_count(), 2);
}

#[tokio::test]
async fn test_review_does_not_reopen_completed_step() {
    let mut record = ProgressRecord::new(3, "patcher/issue-3-add-retry-on-upload", "f00d");
    record.add_step(StepStatus::Completed, Vec::new());
    let body = merge_into_body("Resolves #3", &record).unwrap();
    let scm = Arc::new(
        base_scm()
            .with_change(payloads::change(12, &body))
            .with_check_runs(vec![CheckRun::completed("patcher-gate", "failure")]),
    );
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let Outcome::Reviewed(report) = orch.review(&repo(), 12, ReviewOptions::default()).await
    else {
        panic!("expected review report");
    };

    assert!(!report.approved);
    assert!(!report.state_updated);
    assert_eq!(scm.change_body(12).unwrap(), body);
}

#[tokio::test]
async fn test_review_leaves_failed_step_alone() {
    let mut record = ProgressRecord::new(3, "patcher/issue-3-add-retry-on-upload", "f00d");
    record.add_step(StepStatus::Failed, Vec::new());
    let body = merge_into_body("Resolves #3", &record).unwrap();
    let scm = Arc::new(base_scm().with_change(payloads::change(12, &body)));
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let Outcome::Reviewed(report) = orch.review(&repo(), 12, ReviewOptions::default()).await
    else {
        panic!("expected review report");
    };

    assert!(report.approved);
    assert!(!report.state_updated);
    assert_eq!(scm.change_body(12).unwrap(), body);
}

#[tokio::test]
async fn test_review_updates_record_needing_changes() {
    let mut record = ProgressRecord::new(3, "patcher/issue-3-add-retry-on-upload", "f00d");
    record.add_step(StepStatus::NeedsChanges, vec!["src/upload.rs".into()]);
    let body = merge_into_body("Resolves #3", &record).unwrap();
    let scm = Arc::new(
        base_scm()
            .with_change(payloads::change(12, &body))
            .with_check_runs(vec![CheckRun::completed("patcher-gate", "success")]),
    );
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let Outcome::Reviewed(report) = orch.review(&repo(), 12, ReviewOptions::default()).await
    else {
        panic!("expected review report");
    };

    assert!(report.state_updated);
    let record = record_of(&scm, 12);
    assert_eq!(record.steps.len(), 1);
    assert_eq!(record.steps[0].status, StepStatus::Completed);
    assert_eq!(record.steps[0].changed_paths, vec!["src/upload.rs"]);
}

#[tokio::test]
async fn test_review_unknown_change_fails() {
    let scm = Arc::new(base_scm());
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let outcome = orch.review(&repo(), 404, ReviewOptions::default()).await;

    assert!(outcome.is_failure());
    assert_eq!(generator.critique_count(), 0);
}

// =============================================================================
// Onboarding
// =============================================================================

fn installation(repositories: &[&str]) -> TriggerEvent {
    event(
        "installation",
        payloads::installation_event("created", repositories),
    )
}

fn onboarding_results(outcome: Outcome) -> Vec<OnboardingResult> {
    match outcome {
        Outcome::Onboarded { results } => results,
        other => panic!("expected onboarded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_installation_opens_onboarding_change() {
    let scm = Arc::new(MockSourceControl::new().with_default_branch("trunk"));
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let results = onboarding_results(orch.handle(installation(&["acme/widgets"])).await);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].repository, "acme/widgets");
    assert_eq!(
        results[0].status,
        OnboardingStatus::Opened {
            change: 100,
            url: "https://github.com/acme/widgets/pull/100".into()
        }
    );

    assert_eq!(
        scm.created_branches(),
        vec![("patcher/onboarding".to_string(), "trunk".to_string())]
    );
    let commit = &scm.commits()[0];
    assert_eq!(commit.repo, "acme/widgets");
    assert_eq!(commit.branch, "patcher/onboarding");
    assert_eq!(commit.paths, vec![".github/workflows/patcher-review.yml"]);
    assert!(commit.contents[".github/workflows/patcher-review.yml"].contains("patcher review"));

    let opened = &scm.opened_changes()[0];
    assert_eq!(opened.head, "patcher/onboarding");
    assert_eq!(opened.base, "trunk");
    assert_eq!(opened.labels, vec!["patcher", "onboarding"]);
    assert_eq!(generator.generate_count(), 0);
}

#[tokio::test]
async fn test_onboarding_skips_configured_repositories() {
    let scm = Arc::new(
        MockSourceControl::new()
            .with_file("acme/widgets", ".github/workflows/patcher-review.yml")
            .with_open_change_from("acme/gears", "patcher/onboarding", 7),
    );
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let results = onboarding_results(
        orch.handle(installation(&["acme/widgets", "acme/gears", "acme/bolts"]))
            .await,
    );

    let statuses: Vec<_> = results.iter().map(|r| r.status.clone()).collect();
    assert_eq!(
        statuses[..2],
        [
            OnboardingStatus::Skipped {
                reason: "workflow exists".into()
            },
            OnboardingStatus::Skipped {
                reason: "onboarding PR exists".into()
            },
        ]
    );
    assert!(results[2].is_opened());
    assert_eq!(scm.commits().len(), 1);
    assert_eq!(scm.commits()[0].repo, "acme/bolts");
}

#[tokio::test]
async fn test_onboarding_failure_does_not_stop_other_repositories() {
    let scm = Arc::new(MockSourceControl::new().with_failure("open_change", "HTTP 403"));
    let generator = Arc::new(MockGenerator::new());
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default());

    let results = onboarding_results(
        orch.handle(event(
            "installation_repositories",
            payloads::repositories_added_event(&["acme/widgets", "not-a-slug"]),
        ))
        .await,
    );

    assert_eq!(results.len(), 2);
    let OnboardingStatus::Failed { error } = &results[0].status else {
        panic!("expected failure, got {:?}", results[0].status);
    };
    assert!(error.contains("open_change"));
    assert!(matches!(results[1].status, OnboardingStatus::Failed { .. }));
    assert_eq!(scm.commits().len(), 1);
}

#[tokio::test]
async fn test_onboarding_skips_repository_in_progress() {
    let scm = Arc::new(MockSourceControl::new());
    let generator = Arc::new(MockGenerator::new());
    let guard = DedupGuard::new();
    let orch = orchestrator(&scm, &generator, OrchestratorConfig::default())
        .with_guard(guard.clone());

    let _held = guard
        .acquire(WorkUnitKey::onboarding(&repo()))
        .unwrap();
    let results = onboarding_results(orch.onboard(&["acme/widgets".to_string()]).await);

    assert_eq!(
        results[0].status,
        OnboardingStatus::Skipped {
            reason: "already processing".into()
        }
    );
    assert!(scm.created_branches().is_empty());
}

#[tokio::test]
async fn test_installation_without_onboarding_is_skipped() {
    let scm = Arc::new(MockSourceControl::new());
    let generator = Arc::new(MockGenerator::new());
    let mut config = OrchestratorConfig::default();
    config.onboarding.enabled = false;
    let orch = orchestrator(&scm, &generator, config);

    let outcome = orch.handle(installation(&["acme/widgets"])).await;

    assert_eq!(
        outcome,
        Outcome::Skipped {
            reason: "onboarding disabled".into()
        }
    );
    assert!(scm.opened_changes().is_empty());
}
