//! Onboarding of newly installed repositories.
//!
//! When the app is installed (or repositories are added to an installation)
//! each repository gets a change artifact that adds the review workflow.
//! The workflow file, the change description and the commit message are
//! embedded at compile time via `include_str!` and rendered against the
//! active configuration.
//!
//! # Example
//!
//! ```rust
//! use patcher::config::OrchestratorConfig;
//! use patcher::onboarding::OnboardingKit;
//!
//! let kit = OnboardingKit::new(&OrchestratorConfig::default());
//! assert_eq!(kit.branch, "patcher/onboarding");
//! assert!(kit.workflow.contains("patcher review"));
//! ```

use serde::Serialize;

use crate::config::OrchestratorConfig;

/// Label added next to the trigger label on onboarding changes.
pub const ONBOARDING_LABEL: &str = "onboarding";

const WORKFLOW_TEMPLATE: &str = include_str!("templates/review-workflow.yml");
const BODY_TEMPLATE: &str = include_str!("templates/onboarding-body.md");
const COMMIT_TEMPLATE: &str = include_str!("templates/onboarding-commit.txt");

/// Rendered onboarding artifacts for one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingKit {
    /// Where the workflow is written in the target repository
    pub workflow_path: String,
    pub workflow: String,
    /// Head branch of the onboarding change
    pub branch: String,
    pub title: String,
    pub body: String,
    pub commit_message: String,
    pub labels: Vec<String>,
}

impl OnboardingKit {
    #[must_use]
    pub fn new(config: &OrchestratorConfig) -> Self {
        let settings = &config.onboarding;
        let vars = [
            ("install_command", settings.install_command.clone()),
            ("workflow_path", settings.workflow_path.clone()),
            ("trigger_label", config.trigger_label.clone()),
            ("review_label", config.review_label.clone()),
            ("branch_prefix", config.branch_prefix.clone()),
            ("bot_name", config.bot_name.clone()),
            ("max_iterations", config.max_iterations.to_string()),
        ];

        Self {
            workflow_path: settings.workflow_path.clone(),
            workflow: render(WORKFLOW_TEMPLATE, &vars),
            branch: format!("{}onboarding", config.branch_prefix),
            title: "ci: add patcher review workflow".to_string(),
            body: render(BODY_TEMPLATE, &vars),
            commit_message: render(COMMIT_TEMPLATE, &vars).trim_end().to_string(),
            labels: vec![config.trigger_label.clone(), ONBOARDING_LABEL.to_string()],
        }
    }
}

/// Replace every `{{name}}` placeholder. GitHub expressions (`${{ ... }}`)
/// have a space after the braces and are left alone.
fn render(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{{{name}}}}}"), value)
    })
}

// =============================================================================
// Results
// =============================================================================

/// What happened to one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OnboardingStatus {
    /// An onboarding change was opened
    Opened { change: u64, url: String },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnboardingResult {
    pub repository: String,
    #[serde(flatten)]
    pub status: OnboardingStatus,
}

impl OnboardingResult {
    #[must_use]
    pub fn new(repository: impl Into<String>, status: OnboardingStatus) -> Self {
        Self {
            repository: repository.into(),
            status,
        }
    }

    #[must_use]
    pub fn is_opened(&self) -> bool {
        matches!(self.status, OnboardingStatus::Opened { .. })
    }
}
