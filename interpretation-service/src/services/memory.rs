//! In-memory task store for local runs and tests.

use crate::models::{PageRequest, Task, TaskFilter, TaskWrite, UpsertPolicy, WriteOutcome};
use crate::services::store::{normalize_ids, TaskStore};
use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

struct Entry {
    /// Insertion order, breaks ties between equal `created_at`.
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    rows: HashMap<String, Entry>,
}

impl Inner {
    fn insert(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.rows.insert(task.task_id.clone(), Entry { seq, task });
    }
}

#[derive(Default)]
pub struct MemoryTaskStore {
    inner: RwLock<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, AppError> {
        self.inner
            .read()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("task store lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, AppError> {
        self.inner
            .write()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("task store lock poisoned")))
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &TaskWrite) -> Result<(), AppError> {
        let mut inner = self.write()?;
        if inner.rows.contains_key(&task.task_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Task {} already exists",
                task.task_id
            )));
        }
        inner.insert(Task::from_write(task, Utc::now()));
        Ok(())
    }

    async fn upsert(
        &self,
        write: &TaskWrite,
        policy: UpsertPolicy,
    ) -> Result<WriteOutcome, AppError> {
        let now = Utc::now();
        let mut inner = self.write()?;

        let outcome = match (policy, inner.rows.get_mut(&write.task_id)) {
            (UpsertPolicy::Reset, Some(entry)) => {
                entry.task.apply(write, now);
                WriteOutcome::Updated
            }
            (UpsertPolicy::Reset | UpsertPolicy::FencedOrInsert, None) => {
                inner.insert(Task::from_write(write, now));
                WriteOutcome::Inserted
            }
            (UpsertPolicy::Fenced, None) => WriteOutcome::Missing,
            (_, Some(entry)) => {
                let current = entry.task.fence();
                if write.is_admitted_over(&current) {
                    entry.task.apply(write, now);
                    WriteOutcome::Updated
                } else {
                    warn!(
                        task_id = %write.task_id,
                        attempt = write.attempt,
                        current_attempt = current.attempt,
                        current_status = %current.status,
                        "Rejected stale task write"
                    );
                    WriteOutcome::Stale
                }
            }
        };

        debug!(task_id = %write.task_id, outcome = ?outcome, "Task upserted");
        Ok(outcome)
    }

    async fn find_by_id(&self, task_id: &str) -> Result<Option<Task>, AppError> {
        let inner = self.read()?;
        Ok(inner.rows.get(task_id.trim()).map(|e| e.task.clone()))
    }

    async fn list(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
    ) -> Result<(Vec<Task>, u64), AppError> {
        let inner = self.read()?;
        let mut matched: Vec<&Entry> = inner
            .rows
            .values()
            .filter(|e| filter.matches(&e.task))
            .collect();
        matched.sort_by(|a, b| {
            b.task
                .created_at
                .cmp(&a.task.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        let total = matched.len() as u64;
        let tasks = matched
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(|e| e.task.clone())
            .collect();

        Ok((tasks, total))
    }

    async fn update_content(&self, task_id: &str, content: &str) -> Result<u64, AppError> {
        let mut inner = self.write()?;
        match inner.rows.get_mut(task_id.trim()) {
            Some(entry) => {
                entry.task.edited_content = Some(content.to_string());
                entry.task.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete(&self, task_id: &str) -> Result<u64, AppError> {
        let mut inner = self.write()?;
        Ok(u64::from(inner.rows.remove(task_id.trim()).is_some()))
    }

    async fn delete_many(&self, task_ids: &[String]) -> Result<u64, AppError> {
        let ids = normalize_ids(task_ids);
        let mut inner = self.write()?;
        let deleted = ids
            .iter()
            .filter(|id| inner.rows.remove(id.as_str()).is_some())
            .count();
        Ok(deleted as u64)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.read().map(|_| ())
    }
}
