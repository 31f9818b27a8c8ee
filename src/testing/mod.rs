//! Testing infrastructure for Patcher.
//!
//! Mocks and payload builders for exercising the orchestrator without
//! GitHub or a model backend.
//!
//! # Architecture
//!
//! - **Mocks**: in-memory implementations of [`SourceControl`](crate::github::SourceControl),
//!   [`ChangeGenerator`](crate::collaborator::ChangeGenerator) and
//!   [`LlmClient`](crate::llm::LlmClient) with controllable behavior
//! - **Payloads**: domain values and webhook JSON shaped like GitHub's
//!
//! # Example
//!
//! ```rust,ignore
//! use patcher::testing::{payloads, MockGenerator, MockSourceControl};
//!
//! let scm = MockSourceControl::new().with_issue(payloads::issue(3, "Add retry", ""));
//! let generator = MockGenerator::new().with_files(&["src/retry.rs"]);
//! ```

pub mod mocks;
pub mod payloads;

pub use mocks::*;
