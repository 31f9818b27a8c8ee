//! Event routing.
//!
//! [`Router::route`] classifies a [`TriggerEvent`] without side effects. The
//! rules are checked in priority order and the first one that rejects the
//! event produces the skip reason.

use regex::Regex;
use serde::Serialize;

use crate::config::OrchestratorConfig;
use crate::error::{PatcherError, Result};
use crate::event::{
    CommentAction, InstallationAction, IssueAction, PullAction, RepositoriesAction, ReviewState,
    TriggerEvent,
};

/// Where an advance takes its feedback from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AdvanceSource {
    /// A mention comment; feedback is gathered from the artifact itself
    Comment,
    /// A changes-requested review; feedback is the review body
    Review { feedback: String },
}

/// Routing decision for one trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    /// Begin work on a request.
    Start { issue: u64 },
    /// Revise an existing change artifact.
    Advance { change: u64, source: AdvanceSource },
    /// The change artifact was closed; forget its in-memory counter.
    Release { change: u64, merged: bool },
    /// Open a workflow-installing change in each repository.
    Onboard { repositories: Vec<String> },
    /// Nothing to do.
    Ignore { reason: String },
}

impl Route {
    fn ignore(reason: impl Into<String>) -> Self {
        Self::Ignore {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Ignore { .. })
    }
}

/// Classifies triggers according to the configured labels, branch prefix
/// and mention pattern.
#[derive(Debug, Clone)]
pub struct Router {
    trigger_label: String,
    review_label: String,
    branch_prefix: String,
    onboarding_enabled: bool,
    mention: Regex,
}

impl Router {
    /// # Errors
    ///
    /// Returns [`PatcherError::InvalidConfig`] if the mention pattern cannot
    /// be built from the bot name and trigger words.
    pub fn new(config: &OrchestratorConfig) -> Result<Self> {
        Ok(Self {
            trigger_label: config.trigger_label.clone(),
            review_label: config.review_label.clone(),
            branch_prefix: config.branch_prefix.clone(),
            onboarding_enabled: config.onboarding.enabled,
            mention: mention_pattern(&config.bot_name, &config.trigger_words)?,
        })
    }

    /// Whether `text` mentions the bot.
    #[must_use]
    pub fn is_mention(&self, text: &str) -> bool {
        self.mention.is_match(text)
    }

    /// Whether `branch` was created by the orchestrator.
    #[must_use]
    pub fn is_own_branch(&self, branch: &str) -> bool {
        branch.starts_with(&self.branch_prefix)
    }

    fn onboard(&self, repositories: &[String]) -> Route {
        if !self.onboarding_enabled {
            return Route::ignore("onboarding disabled");
        }
        if repositories.is_empty() {
            return Route::ignore("no repositories to onboard");
        }
        Route::Onboard {
            repositories: repositories.to_vec(),
        }
    }

    /// Decide what to do with `event`.
    #[must_use]
    pub fn route(&self, event: &TriggerEvent) -> Route {
        match event {
            TriggerEvent::Issue { action, issue, .. } => {
                if !issue.has_label(&self.trigger_label) {
                    return Route::ignore(format!("missing {} label", self.trigger_label));
                }
                match action {
                    IssueAction::Opened | IssueAction::Labeled => Route::Start {
                        issue: issue.number,
                    },
                    IssueAction::Other(other) => {
                        Route::ignore(format!("unsupported action: {other}"))
                    }
                }
            }

            TriggerEvent::IssueComment {
                action,
                issue,
                comment_body,
                ..
            } => {
                if let CommentAction::Other(other) = action {
                    return Route::ignore(format!("unsupported action: {other}"));
                }
                if !issue.is_pull_request {
                    return Route::ignore("not a pull request");
                }
                if !issue.has_label(&self.trigger_label) && !issue.has_label(&self.review_label) {
                    return Route::ignore(format!(
                        "no {}/{} label",
                        self.trigger_label, self.review_label
                    ));
                }
                if !self.is_mention(comment_body) {
                    return Route::ignore("no mention");
                }
                Route::Advance {
                    change: issue.number,
                    source: AdvanceSource::Comment,
                }
            }

            TriggerEvent::PullRequestReview { pull, review, .. } => {
                if !self.is_own_branch(&pull.head_ref) {
                    return Route::ignore("not a patcher PR");
                }
                if review.state != ReviewState::ChangesRequested {
                    return Route::ignore("not a changes_requested review");
                }
                Route::Advance {
                    change: pull.number,
                    source: AdvanceSource::Review {
                        feedback: review.body.clone(),
                    },
                }
            }

            TriggerEvent::PullRequest { action, pull, .. } => match action {
                PullAction::Closed if self.is_own_branch(&pull.head_ref) => Route::Release {
                    change: pull.number,
                    merged: pull.merged,
                },
                PullAction::Closed | PullAction::Other(_) => {
                    Route::ignore("reviews handled by workflow")
                }
            },

            TriggerEvent::Installation {
                action,
                repositories,
                ..
            } => match action {
                InstallationAction::Created => self.onboard(repositories),
                InstallationAction::Deleted => Route::ignore("installation deleted"),
                InstallationAction::Other(other) => {
                    Route::ignore(format!("unsupported action: {other}"))
                }
            },

            TriggerEvent::InstallationRepositories {
                action,
                repositories,
                ..
            } => match action {
                RepositoriesAction::Added => self.onboard(repositories),
                RepositoriesAction::Removed => Route::ignore("repositories removed"),
                RepositoriesAction::Other(other) => {
                    Route::ignore(format!("unsupported action: {other}"))
                }
            },

            TriggerEvent::Ignored { kind, .. } => Route::ignore(format!("ignored event: {kind}")),
            TriggerEvent::Unsupported { kind, .. } => {
                Route::ignore(format!("unsupported event: {kind}"))
            }
        }
    }
}

/// `@name` or `/name`, optionally followed by one of `words`, ignoring case.
fn mention_pattern(bot_name: &str, words: &[String]) -> Result<Regex> {
    let name = regex::escape(bot_name.trim());
    let words: Vec<String> = words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .map(regex::escape)
        .collect();

    let pattern = if words.is_empty() {
        format!(r"(?i)(?:@{name}|/{name})\b")
    } else {
        format!(r"(?i)(?:@{name}|/{name})\b\s*(?:{})?", words.join("|"))
    };

    Regex::new(&pattern).map_err(|e| PatcherError::InvalidConfig {
        field: "botName".to_string(),
        reason: e.to_string(),
    })
}
