//! Lifecycle shared by the configuration modules

use serde::Serialize;

use crate::error::Result;
use crate::locator::ArtifactSet;
use crate::reload::ReloadStatus;

/// Result of a successful commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum CommitOutcome {
    /// Nothing was staged; no file was touched
    Unchanged,
    /// Staged state was persisted
    Committed { reload: ReloadStatus },
}

/// locate, load, stage, diff, commit.
///
/// Staging is specific to each module and lives on the implementing type;
/// everything else is driven through this trait.
pub trait ConfigModule {
    /// Display name of the module
    fn name(&self) -> &'static str;

    /// Resolve the artifacts this module works with. Idempotent.
    fn locate(&mut self) -> Result<&ArtifactSet>;

    /// (Re)build the in-memory model from the persisted artifacts,
    /// discarding staged edits. Unreadable artifacts degrade the module
    /// instead of failing.
    fn load(&mut self) -> Result<()>;

    /// Whether staged state differs from persisted state
    fn unsaved_changes(&self) -> bool;

    /// Persist staged state and ask the daemon to reload.
    ///
    /// Files are read, modified and replaced without locking; an edit made
    /// by someone else since [`ConfigModule::load`] is overwritten.
    fn commit(&mut self) -> Result<CommitOutcome>;

    /// `locate` followed by `load`
    fn activate(&mut self) -> Result<()> {
        self.locate()?;
        self.load()
    }
}
