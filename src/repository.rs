//! Repository pattern for record storage
//!
//! The parser writes through [`RecordRepository`] so it can feed the SQLite
//! store in production and an in-memory store in dry runs and tests.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Result;
use crate::models::{DedupKey, RecordKind, UnifiedRecord};

/// Destination for converted records
#[cfg_attr(test, mockall::automock)]
pub trait RecordRepository: Send + Sync {
    /// Insert a record unless an identical one is already stored.
    ///
    /// A duplicate is not an error. The returned id is only meaningful for
    /// fresh inserts; callers cannot tell the two cases apart.
    fn insert_record(&self, record: &UnifiedRecord) -> Result<i64>;
}

/// Records kept in memory, deduplicated on [`UnifiedRecord::dedup_key`]
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<UnifiedRecord>,
    index: HashMap<DedupKey, i64>,
}

impl MemoryRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct records stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Whether nothing has been stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored records of one kind
    #[must_use]
    pub fn count(&self, kind: RecordKind) -> usize {
        self.state
            .lock()
            .records
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    /// Copy of every stored record in insertion order
    #[must_use]
    pub fn records(&self) -> Vec<UnifiedRecord> {
        self.state.lock().records.clone()
    }
}

impl RecordRepository for MemoryRepository {
    fn insert_record(&self, record: &UnifiedRecord) -> Result<i64> {
        let mut state = self.state.lock();
        let key = record.dedup_key();
        if let Some(id) = state.index.get(&key) {
            return Ok(*id);
        }
        state.records.push(record.clone());
        let id = i64::try_from(state.records.len()).unwrap_or(i64::MAX);
        state.index.insert(key, id);
        Ok(id)
    }
}

impl<T: RecordRepository + ?Sized> RecordRepository for std::sync::Arc<T> {
    fn insert_record(&self, record: &UnifiedRecord) -> Result<i64> {
        (**self).insert_record(record)
    }
}
