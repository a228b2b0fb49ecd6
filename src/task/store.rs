use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::task::{GenerationMode, TaskRecord, TaskUpdate};

/// Outcome of `TaskStore::seed`.
#[derive(Debug, Clone, PartialEq)]
pub enum Seeded {
    Created(TaskRecord),
    /// A record already existed, typically because a callback raced ahead.
    Existing(TaskRecord),
}

impl Seeded {
    pub fn record(&self) -> &TaskRecord {
        match self {
            Self::Created(r) | Self::Existing(r) => r,
        }
    }

    pub fn into_record(self) -> TaskRecord {
        match self {
            Self::Created(r) | Self::Existing(r) => r,
        }
    }
}

/// Storage seam for task records. The reconciliation engine only talks to this
/// trait, so a durable backing can replace the in-memory map.
///
/// Implementations must make `seed` and `merge` atomic per key.
pub trait TaskStore: Send + Sync {
    /// Create a `queued` record unless one exists. An existing record only
    /// gains the mode if it had none.
    fn seed(&self, task_id: &str, mode: GenerationMode) -> Seeded;

    /// Apply `update` under the sticky-terminal rule, creating the record if
    /// the key is unknown. Returns the record after the merge.
    fn merge(&self, task_id: &str, update: &TaskUpdate) -> TaskRecord;

    fn get(&self, task_id: &str) -> Option<TaskRecord>;

    /// Drop records not updated within `max_age`. Returns how many were removed.
    fn purge_older_than(&self, max_age: Duration) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Volatile store. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<String, TaskRecord>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn seed(&self, task_id: &str, mode: GenerationMode) -> Seeded {
        // `entry` holds the shard write lock until the guard drops.
        match self.tasks.entry(task_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.mode.is_none() {
                    record.mode = Some(mode);
                    record.updated_at = Utc::now();
                }
                Seeded::Existing(record.clone())
            }
            Entry::Vacant(vacant) => {
                let record = TaskRecord::new(task_id, Some(mode), Utc::now());
                vacant.insert(record.clone());
                Seeded::Created(record)
            }
        }
    }

    fn merge(&self, task_id: &str, update: &TaskUpdate) -> TaskRecord {
        let now = Utc::now();
        let mut entry = self
            .tasks
            .entry(task_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(task_id, "merge for unseeded task, creating record");
                TaskRecord::new(task_id, None, now)
            });
        let record = entry.value_mut();
        let from = record.status;
        if update.apply_to(record, now) && from != record.status {
            tracing::debug!(task_id, from = %from, to = %record.status, "task status changed");
        }
        record.clone()
    }

    fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|r| r.value().clone())
    }

    fn purge_older_than(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;
        let before = self.tasks.len();
        self.tasks.retain(|_, record| record.updated_at >= cutoff);
        before.saturating_sub(self.tasks.len())
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}
