//! LLM client abstraction.
//!
//! The generation collaborator talks to a model only through [`LlmClient`].
//! [`ClaudeClient`] runs the `claude` CLI in print mode; tests use
//! [`MockLlmClient`](crate::testing::MockLlmClient).
//!
//! # Example
//!
//! ```rust,ignore
//! use patcher::llm::{ClaudeClient, LlmClient};
//!
//! let client: Box<dyn LlmClient> = Box::new(ClaudeClient::new(".").with_model("sonnet"));
//! let response = client.run_prompt("Summarize this diff").await?;
//! ```

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Abstraction for LLM client operations.
///
/// Object-safe and `Send + Sync`, so one `Arc<dyn LlmClient>` can serve
/// every trigger in the process.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a prompt and return the model's response.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be reached, the call times out,
    /// or the backend exits unsuccessfully.
    async fn run_prompt(&self, prompt: &str) -> Result<String>;

    /// Human-readable model identifier.
    fn model_name(&self) -> &str;
}

/// Claude client backed by the `claude` CLI.
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    /// Working directory for the CLI.
    project_dir: PathBuf,
    /// Model variant ("opus", "sonnet", "haiku").
    model: String,
    timeout_secs: u64,
}

impl ClaudeClient {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(project_dir: P) -> Self {
        Self {
            project_dir: project_dir.into(),
            model: "opus".to_string(),
            timeout_secs: 900,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn cli_args(&self) -> Vec<&str> {
        vec!["-p", "--model", &self.model, "--output-format", "text"]
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    async fn run_prompt(&self, prompt: &str) -> Result<String> {
        debug!(
            "Running Claude with model {} ({} chars prompt)",
            self.model,
            prompt.len()
        );

        let mut child = AsyncCommand::new("claude")
            .args(self.cli_args())
            .current_dir(&self.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    anyhow::anyhow!("The 'claude' CLI is not installed or not in PATH")
                }
                _ => anyhow::anyhow!("Failed to spawn claude process: {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to stdin")?;
            stdin.flush().await?;
            drop(stdin);
        }

        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Claude timed out after {}s", self.timeout_secs))?
        .context("Failed to read claude output")?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Claude process exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )
        }
    }

    fn model_name(&self) -> &str {
        match self.model.as_str() {
            "opus" => "claude-opus-4",
            "sonnet" => "claude-sonnet-4",
            "haiku" => "claude-haiku-3.5",
            other => other,
        }
    }
}
