//! Patcher - issue-to-pull-request orchestration
//!
//! Turns labeled issues into pull requests and keeps revising them in
//! response to review feedback and failing checks, until a reviewer is
//! satisfied or the revision budget runs out. The only durable state is a
//! progress record embedded in the pull request description.
//!
//! # Architecture
//!
//! - [`event`] - Inbound trigger parsing
//! - [`router`] - Trigger classification
//! - [`guard`] - Duplicate-delivery guard
//! - [`iteration`] - Per-artifact revision budget
//! - [`state`] - Progress record, its codec and store
//! - [`checks`] - Check-status aggregation and settle-wait
//! - [`orchestrator`] - The control loop tying it together
//! - [`onboarding`] - Review-workflow installation for new repositories
//! - [`github`] - Source-control abstraction and the `gh` CLI backend
//! - [`collaborator`] / [`llm`] - Content generation and critique
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Mocks and payload builders
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use patcher::{GhCliSourceControl, LlmCollaborator, ClaudeClient, Orchestrator, OrchestratorConfig, TriggerEvent};
//!
//! let config = OrchestratorConfig::load(Path::new("."))?;
//! let scm = Arc::new(GhCliSourceControl::detect()?);
//! let generator = Arc::new(LlmCollaborator::new(Arc::new(ClaudeClient::new("."))));
//! let orchestrator = Orchestrator::new(config, scm, generator)?;
//!
//! let event = TriggerEvent::from_json("issues", &payload)?;
//! let outcome = orchestrator.handle(event).await;
//! ```

pub mod checks;
pub mod collaborator;
pub mod config;
pub mod error;
pub mod event;
pub mod github;
pub mod guard;
pub mod iteration;
pub mod llm;
pub mod onboarding;
pub mod orchestrator;
pub mod router;
pub mod state;
pub mod testing;

// Re-export commonly used types
pub use error::{IntoPatcherError, PatcherError, Result};

pub use config::{
    CheckSettings, LlmSettings, OnboardingSettings, OrchestratorConfig, ValidationReport,
};

pub use event::{EventKind, ReviewState, TriggerEvent, WorkUnitKey, WorkUnitKind};
pub use router::{AdvanceSource, Route, Router};
pub use guard::{DedupGuard, DedupPermit};
pub use iteration::{Budget, IterationController};

pub use state::{ProgressRecord, StateStore, Step, StepStatus};

pub use checks::{CheckAggregator, CheckRun, CheckState, CheckVerdict};

pub use github::{ChangeArtifact, GhCliSourceControl, Issue, RepoRef, SourceControl};

pub use collaborator::{ChangeGenerator, Critique, GeneratedChange, LlmCollaborator};
pub use llm::{ClaudeClient, LlmClient};

pub use onboarding::{OnboardingKit, OnboardingResult, OnboardingStatus};
pub use orchestrator::{Orchestrator, Outcome, ReviewOptions, ReviewReport};
