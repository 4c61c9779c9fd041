mod sqlite;

use std::{collections::BTreeSet, path::Path};

pub use sqlite::Sqlite;

use crate::{pipeline::Journal, result::Result};

/// Identifier the database prefers to the `(source id, destination)` pair.
///
/// This identifier **must** be unique for each item in the database.
pub type ItemKey = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessedState {
    /// The item has not been processed
    NotProcessed,

    /// The item has been partially processed.
    /// This contains the indexes of the artifacts that **remain to be delivered**.
    RemainingArtifacts(Vec<usize>),

    /// The item has been entirely processed
    Completed,
}

/// A trait for saving which items were delivered where, between multiple executions.
///
/// This avoids delivering an item twice to the same destination and lets an
/// interrupted item continue where it stopped.
pub trait CacheDb
where
    Self: Sized + Sync,
{
    /// Read the history file at the given path or create it if it does not exist.
    ///
    /// If the file does exist but is not a valid database file, an error
    /// **should** be returned.
    fn read_or_create(p: &Path) -> Result<Self>;

    /// Check the state of the item for a destination.
    /// Also return the database preferred key of the pair.
    fn check_item(&self, source_id: &str, destination: &str) -> Result<(ItemKey, ProcessedState)>;

    /// Inform the database that the item needs this number of artifacts to be
    /// fully delivered.
    ///
    /// This overwrites any previous assignment along with its progress.
    fn assign_work(&self, item: ItemKey, count: usize) -> Result<()>;

    /// Inform the database that the artifact with this zero-based index was delivered
    fn complete_work(&self, item: ItemKey, index: usize) -> Result<()>;

    /// Inform the database that everything was delivered for the item
    fn set_item_as_completed(&self, item: ItemKey) -> Result<()>;

    /// Count the items in the database, only those in the `filter` state if given
    fn count_items(&self, filter: Option<ProcessedState>) -> Result<usize>;
}

/// The [`Journal`] of one item, backed by a [`CacheDb`]
pub struct ItemJournal<'a, D> {
    db: &'a D,
    item: ItemKey,
    state: ProcessedState,
    /// Ignore the recorded progress
    force: bool,
}

impl<'a, D: CacheDb> ItemJournal<'a, D> {
    pub fn open(db: &'a D, source_id: &str, destination: &str, force: bool) -> Result<Self> {
        let (item, state) = db.check_item(source_id, destination)?;
        Ok(Self {
            db,
            item,
            state,
            force,
        })
    }

    /// Whether the item was entirely delivered by a previous run
    pub fn is_completed(&self) -> bool {
        !self.force && self.state == ProcessedState::Completed
    }

    pub fn set_completed(&self) -> Result<()> {
        self.db.set_item_as_completed(self.item)
    }
}

impl<D: CacheDb> Journal for ItemJournal<'_, D> {
    fn remaining(&self) -> Result<Option<BTreeSet<usize>>> {
        if self.force {
            return Ok(None);
        }
        Ok(match &self.state {
            ProcessedState::NotProcessed => None,
            ProcessedState::RemainingArtifacts(remaining) => {
                Some(remaining.iter().copied().collect())
            }
            ProcessedState::Completed => Some(BTreeSet::new()),
        })
    }

    fn assign(&self, count: usize) -> Result<()> {
        self.db.assign_work(self.item, count)
    }

    fn artifact_done(&self, index: usize) -> Result<()> {
        self.db.complete_work(self.item, index)
    }
}
