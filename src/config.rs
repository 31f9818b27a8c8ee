//! Configuration management for Patcher.
//!
//! Settings are read from `.patcher/settings.json` (camelCase keys), then
//! environment overrides are applied. A missing file means defaults.
//!
//! # Example settings.json
//!
//! ```json
//! {
//!   "maxIterations": 3,
//!   "triggerLabel": "patcher",
//!   "checks": { "timeoutSecs": 300, "pollIntervalSecs": 15 },
//!   "llm": { "model": "sonnet" },
//!   "onboarding": { "enabled": false }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PatcherError, Result};

pub const ENV_MAX_ITERATIONS: &str = "PATCHER_MAX_ITERATIONS";
pub const ENV_TRIGGER_LABEL: &str = "PATCHER_TRIGGER_LABEL";
pub const ENV_BOT_NAME: &str = "PATCHER_BOT_NAME";
pub const ENV_LLM_MODEL: &str = "PATCHER_LLM_MODEL";
pub const ENV_CHECK_TIMEOUT_SECS: &str = "PATCHER_CHECK_TIMEOUT_SECS";

/// Check-polling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSettings {
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Wait for pending checks to settle before an advance reads them
    #[serde(default)]
    pub wait_before_advance: bool,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_check_timeout(),
            poll_interval_secs: default_poll_interval(),
            wait_before_advance: false,
        }
    }
}

impl CheckSettings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_check_timeout() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    30
}

/// Settings for the model behind the generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmSettings {
    /// Claude CLI model name ("opus", "sonnet", "haiku")
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_model() -> String {
    "opus".to_string()
}

fn default_llm_timeout() -> u64 {
    900
}

/// What happens when the app is installed on a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingSettings {
    /// Open a pull request adding the review workflow
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_workflow_path")]
    pub workflow_path: String,
    /// Shell command the workflow runs to install this binary
    #[serde(default = "default_install_command")]
    pub install_command: String,
}

impl Default for OnboardingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            workflow_path: default_workflow_path(),
            install_command: default_install_command(),
        }
    }
}

fn default_workflow_path() -> String {
    ".github/workflows/patcher-review.yml".to_string()
}

fn default_install_command() -> String {
    "cargo install patcher --locked".to_string()
}

/// Orchestrator configuration loaded from `.patcher/settings.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Revision budget per change artifact
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Label that makes an issue actionable
    #[serde(default = "default_trigger_label")]
    pub trigger_label: String,

    /// Second label that makes a change artifact accept mention comments
    #[serde(default = "default_review_label")]
    pub review_label: String,

    /// Prefix of every branch the orchestrator creates
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Name that is mentioned as `@name` or `/name`
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    /// Words that may follow a mention
    #[serde(default = "default_trigger_words")]
    pub trigger_words: Vec<String>,

    /// Substrings identifying the orchestrator's own checks
    #[serde(default = "default_own_check_patterns")]
    pub own_check_patterns: Vec<String>,

    #[serde(default)]
    pub checks: CheckSettings,

    /// Base branch for new changes; the repository default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,

    /// Seed the in-memory revision counter from the persisted record
    #[serde(default = "default_true")]
    pub seed_iterations_from_state: bool,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub onboarding: OnboardingSettings,
}

fn default_max_iterations() -> u32 {
    5
}

fn default_trigger_label() -> String {
    "patcher".to_string()
}

fn default_review_label() -> String {
    "ai-review".to_string()
}

fn default_branch_prefix() -> String {
    "patcher/".to_string()
}

fn default_bot_name() -> String {
    "patcher".to_string()
}

fn default_trigger_words() -> Vec<String> {
    vec!["fix".into(), "исправь".into(), "исправить".into()]
}

fn default_own_check_patterns() -> Vec<String> {
    vec!["patcher".into(), "ai-review".into()]
}

fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            trigger_label: default_trigger_label(),
            review_label: default_review_label(),
            branch_prefix: default_branch_prefix(),
            bot_name: default_bot_name(),
            trigger_words: default_trigger_words(),
            own_check_patterns: default_own_check_patterns(),
            checks: CheckSettings::default(),
            base_branch: None,
            seed_iterations_from_state: true,
            llm: LlmSettings::default(),
            onboarding: OnboardingSettings::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration for a project directory and apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`PatcherError::Config`] if the file exists but cannot be
    /// read or parsed, or an override holds an invalid value.
    pub fn load(project_dir: &Path) -> Result<Self> {
        Self::load_from(&Self::settings_path(project_dir))
    }

    /// Load configuration from an explicit file path.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            PatcherError::config_with_path(format!("failed to read: {e}"), path.to_path_buf())
        })?;
        serde_json::from_str(&content).map_err(|e| {
            PatcherError::config_with_path(format!("failed to parse: {e}"), path.to_path_buf())
        })
    }

    /// Get the settings.json path for a project
    #[must_use]
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".patcher/settings.json")
    }

    /// Apply overrides looked up through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`PatcherError::InvalidConfig`] for a non-numeric numeric
    /// override.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_ITERATIONS) {
            self.max_iterations = parse_number(ENV_MAX_ITERATIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TRIGGER_LABEL) {
            self.trigger_label = raw.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_BOT_NAME) {
            self.bot_name = raw.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_LLM_MODEL) {
            self.llm.model = raw.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_CHECK_TIMEOUT_SECS) {
            self.checks.timeout_secs = parse_number(ENV_CHECK_TIMEOUT_SECS, &raw)?;
        }
        Ok(())
    }

    /// Check the configuration for values the orchestrator cannot work with.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.max_iterations == 0 {
            report
                .errors
                .push("maxIterations must be at least 1".to_string());
        }
        if self.trigger_label.trim().is_empty() {
            report.errors.push("triggerLabel must not be empty".to_string());
        }
        if self.review_label.trim().is_empty() {
            report.errors.push("reviewLabel must not be empty".to_string());
        }
        if self.branch_prefix.trim().is_empty() {
            report.errors.push("branchPrefix must not be empty".to_string());
        }
        if self.bot_name.trim().is_empty() {
            report.errors.push("botName must not be empty".to_string());
        }
        if self.checks.poll_interval_secs == 0 {
            report
                .errors
                .push("checks.pollIntervalSecs must be at least 1".to_string());
        } else if self.checks.poll_interval_secs >= self.checks.timeout_secs {
            report.errors.push(format!(
                "checks.pollIntervalSecs ({}) must be below checks.timeoutSecs ({})",
                self.checks.poll_interval_secs, self.checks.timeout_secs
            ));
        }

        if self.onboarding.enabled {
            if self.onboarding.workflow_path.trim().is_empty() {
                report
                    .errors
                    .push("onboarding.workflowPath must not be empty".to_string());
            } else if !self.onboarding.workflow_path.starts_with(".github/workflows/") {
                report.warnings.push(format!(
                    "onboarding.workflowPath '{}' is outside .github/workflows and will not run",
                    self.onboarding.workflow_path
                ));
            }
        }

        if self.own_check_patterns.is_empty() {
            report.warnings.push(
                "ownCheckPatterns is empty; reviews will treat every change as passing its gates"
                    .to_string(),
            );
        }
        if !self.branch_prefix.ends_with('/') && !self.branch_prefix.ends_with('-') {
            report.warnings.push(format!(
                "branchPrefix '{}' has no separator at the end",
                self.branch_prefix
            ));
        }

        report
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| PatcherError::InvalidConfig {
        field: key.to_string(),
        reason: format!("expected a non-negative integer, got '{raw}'"),
    })
}

/// Outcome of [`OrchestratorConfig::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Problems that make the configuration unusable.
    pub errors: Vec<String>,
    /// Suspicious but workable values.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Process exit code: 0 when valid, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_valid())
    }
}
