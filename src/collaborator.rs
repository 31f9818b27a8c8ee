//! Generation and critique collaborator.
//!
//! The orchestrator treats content generation as an opaque function: it
//! hands over a [`GenerationRequest`] and gets back a set of files, or hands
//! over a diff and gets back a [`Critique`]. [`LlmCollaborator`] implements
//! both on top of any [`LlmClient`].
//!
//! # Degradation
//!
//! [`LlmCollaborator`] never returns an error. A model that cannot be reached
//! or returns unparseable output yields an empty [`GeneratedChange`] or a
//! not-approved [`Critique`], each carrying the failure message. Other
//! implementations may return errors; the orchestrator turns those into a
//! failed outcome as well.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::github::Issue;
use crate::llm::LlmClient;

const MAX_BODY_CHARS: usize = 8000;
const MAX_DIFF_CHARS: usize = 10_000;
const MAX_FAILURE_CHARS: usize = 2000;

// =============================================================================
// Generation
// =============================================================================

/// What the generator is asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum GenerationTask {
    /// First implementation of the request.
    Implement,
    /// Fix the project's failing checks.
    FixChecks { failures: Vec<String> },
    /// Address reviewer feedback.
    AddressFeedback { feedback: String },
}

/// Input to [`ChangeGenerator::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub issue: Issue,
    /// Change artifact being revised, absent for the first generation
    pub change: Option<u64>,
    pub task: GenerationTask,
}

/// What to do with a generated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    #[default]
    Modify,
    Delete,
}

/// One generated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub action: FileAction,
}

/// Output of [`ChangeGenerator::generate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedChange {
    #[serde(default)]
    pub files: Vec<FileChange>,
    #[serde(default)]
    pub explanation: String,
}

impl GeneratedChange {
    /// Empty output carrying the reason generation failed.
    #[must_use]
    pub fn failed(explanation: impl Into<String>) -> Self {
        Self {
            files: Vec::new(),
            explanation: explanation.into(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

// =============================================================================
// Critique
// =============================================================================

/// Input to [`ChangeGenerator::critique`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CritiqueRequest {
    pub title: String,
    /// Visible change description, state block removed
    pub description: String,
    pub diff: String,
    pub issue: Option<Issue>,
}

/// A problem found in a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritiqueIssue {
    /// "error", "warning" or "info"
    pub severity: String,
    #[serde(default, alias = "file_path")]
    pub path: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
}

/// Output of [`ChangeGenerator::critique`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<CritiqueIssue>,
    #[serde(default, alias = "assessment")]
    pub summary: String,
    #[serde(default = "default_true")]
    pub requirements_met: bool,
    #[serde(default)]
    pub requirements_notes: String,
}

fn default_true() -> bool {
    true
}

impl Critique {
    /// Not-approved critique carrying the reason it could not be produced.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            approved: false,
            issues: Vec::new(),
            summary: message.into(),
            requirements_met: false,
            requirements_notes: String::new(),
        }
    }

    #[must_use]
    pub fn count_severity(&self, severity: &str) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity.eq_ignore_ascii_case(severity))
            .count()
    }
}

// =============================================================================
// Trait
// =============================================================================

/// Opaque content generator.
#[async_trait]
pub trait ChangeGenerator: Send + Sync {
    /// Produce file contents for `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedChange>;

    /// Judge a change.
    async fn critique(&self, request: &CritiqueRequest) -> Result<Critique>;
}

// =============================================================================
// LLM-backed implementation
// =============================================================================

/// [`ChangeGenerator`] that prompts a model for JSON output.
#[derive(Clone)]
pub struct LlmCollaborator {
    client: Arc<dyn LlmClient>,
}

impl LlmCollaborator {
    #[must_use]
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    async fn ask<T: DeserializeOwned>(&self, prompt: &str) -> Result<T> {
        let response = self.client.run_prompt(prompt).await?;
        debug!(
            model = self.client.model_name(),
            chars = response.len(),
            "Model responded"
        );
        parse_json_response(&response)
    }
}

#[async_trait]
impl ChangeGenerator for LlmCollaborator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedChange> {
        let prompt = generation_prompt(request);
        match self.ask::<GeneratedChange>(&prompt).await {
            Ok(change) => Ok(change),
            Err(e) => {
                warn!("Generation failed, degrading to empty output: {e:#}");
                Ok(GeneratedChange::failed(format!(
                    "Code generation failed: {e:#}"
                )))
            }
        }
    }

    async fn critique(&self, request: &CritiqueRequest) -> Result<Critique> {
        let prompt = critique_prompt(request);
        match self.ask::<Critique>(&prompt).await {
            Ok(critique) => Ok(critique),
            Err(e) => {
                warn!("Critique failed, degrading to not approved: {e:#}");
                Ok(Critique::failed(format!("Review failed: {e:#}")))
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn generation_prompt(request: &GenerationRequest) -> String {
    let issue = &request.issue;
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are implementing changes in a repository for the issue below.\n\
         Follow the existing code style and keep changes minimal.\n\
         Never modify CI/CD configuration such as .github/workflows.\n"
    );
    let _ = writeln!(
        prompt,
        "Issue #{}: {}\n\n{}\n",
        issue.number,
        issue.title,
        truncate(&issue.body, MAX_BODY_CHARS)
    );

    match &request.task {
        GenerationTask::Implement => {
            let _ = writeln!(prompt, "Implement the issue.");
        }
        GenerationTask::FixChecks { failures } => {
            let _ = writeln!(prompt, "CI failures:");
            for failure in failures {
                let _ = writeln!(prompt, "{}", truncate(failure, MAX_FAILURE_CHARS));
            }
            let _ = writeln!(
                prompt,
                "\nFix only what is needed to make these checks pass."
            );
        }
        GenerationTask::AddressFeedback { feedback } => {
            let _ = writeln!(
                prompt,
                "Review feedback:\n{feedback}\n\nAddress every feedback point."
            );
        }
    }

    let _ = write!(
        prompt,
        "\nRespond with a single JSON object and nothing else:\n\
         {{\"files\": [{{\"path\": \"relative/path\", \"content\": \"complete file content\", \
         \"action\": \"create|modify|delete\"}}], \"explanation\": \"short explanation\"}}"
    );
    prompt
}

fn critique_prompt(request: &CritiqueRequest) -> String {
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "Review this pull request strictly against its issue. Report only problems that\n\
         keep the issue from being solved: missing requirements, critical bugs, security\n\
         vulnerabilities, or changes to CI/CD configuration. No style suggestions.\n"
    );
    let _ = writeln!(
        prompt,
        "PR Title: {}\nPR Description: {}\n",
        request.title, request.description
    );
    if let Some(issue) = &request.issue {
        let _ = writeln!(
            prompt,
            "Related Issue: #{} - {}\n{}\n",
            issue.number,
            issue.title,
            truncate(&issue.body, MAX_BODY_CHARS)
        );
    }
    let _ = writeln!(
        prompt,
        "Diff:\n```diff\n{}\n```\n",
        truncate(&request.diff, MAX_DIFF_CHARS)
    );
    let _ = write!(
        prompt,
        "Respond with a single JSON object and nothing else:\n\
         {{\"approved\": true, \"summary\": \"overall assessment\", \"requirements_met\": true, \
         \"requirements_notes\": \"\", \"issues\": [{{\"severity\": \"error|warning\", \
         \"path\": \"file\", \"line\": 1, \"description\": \"...\", \"suggestion\": \"...\"}}]}}"
    );
    prompt
}

/// Extract a JSON object from model output.
///
/// Accepts a bare object, an object inside a ```` ```json ```` fence, or an
/// object surrounded by prose.
///
/// # Errors
///
/// Returns an error if no object can be found or it does not match `T`.
pub fn parse_json_response<T: DeserializeOwned>(text: &str) -> Result<T> {
    let candidate = fenced_json(text)
        .or_else(|| outer_object(text))
        .ok_or_else(|| anyhow!("no JSON object in model output"))?;
    serde_json::from_str(candidate).map_err(|e| anyhow!("invalid JSON in model output: {e}"))
}

fn fenced_json(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
