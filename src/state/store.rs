//! Loads and saves [`ProgressRecord`]s through the change artifact body.
//!
//! Saving is a read-modify-write of the whole description with no revision
//! check: when two writers race, the last one wins.

use std::sync::Arc;

use tracing::{debug, info};

use super::{codec, ProgressRecord};
use crate::error::{IntoPatcherError, PatcherError, Result};
use crate::github::{RepoRef, SourceControl};

/// Progress-record persistence for one code host.
#[derive(Clone)]
pub struct StateStore {
    scm: Arc<dyn SourceControl>,
}

impl StateStore {
    #[must_use]
    pub fn new(scm: Arc<dyn SourceControl>) -> Self {
        Self { scm }
    }

    /// Read the record embedded in change artifact `change`.
    ///
    /// A description without a block, or with one that does not decode,
    /// yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`PatcherError::SourceControl`] if the artifact cannot be
    /// fetched.
    pub async fn load(&self, repo: &RepoRef, change: u64) -> Result<Option<ProgressRecord>> {
        let artifact = self
            .scm
            .get_change(repo, change)
            .await
            .into_source_control("get_change")?;
        let record = codec::decode(&artifact.body);
        debug!(change, found = record.is_some(), "Loaded progress record");
        Ok(record)
    }

    /// Like [`load`](Self::load), but a missing record is an error.
    ///
    /// # Errors
    ///
    /// Returns [`PatcherError::StateMissing`] when no record is present.
    pub async fn load_required(&self, repo: &RepoRef, change: u64) -> Result<ProgressRecord> {
        self.load(repo, change)
            .await?
            .ok_or(PatcherError::StateMissing { change })
    }

    /// Write `record` into the description of `change`, keeping the visible
    /// text untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be read or updated.
    pub async fn save(&self, repo: &RepoRef, change: u64, record: &ProgressRecord) -> Result<()> {
        let artifact = self
            .scm
            .get_change(repo, change)
            .await
            .into_source_control("get_change")?;
        let body = codec::merge_into_body(&artifact.body, record)?;
        self.scm
            .update_change_body(repo, change, &body)
            .await
            .into_source_control("update_change_body")?;
        info!(
            change,
            steps = record.step_count(),
            "Saved progress record"
        );
        Ok(())
    }

    /// Load the record, apply `update` to it and save the result.
    ///
    /// # Errors
    ///
    /// Returns [`PatcherError::StateMissing`] when there is no record, any
    /// error `update` returns, or a persistence error.
    pub async fn update<F>(&self, repo: &RepoRef, change: u64, update: F) -> Result<ProgressRecord>
    where
        F: FnOnce(&mut ProgressRecord) -> Result<()> + Send,
    {
        let mut record = self.load_required(repo, change).await?;
        update(&mut record)?;
        self.save(repo, change, &record).await?;
        Ok(record)
    }
}
