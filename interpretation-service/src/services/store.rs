//! Task persistence contract.

use crate::models::{PageRequest, Task, TaskFilter, TaskWrite, UpsertPolicy, WriteOutcome};
use async_trait::async_trait;
use service_core::error::AppError;

/// Single-table task store.
///
/// Every write is atomic: on error nothing of that call is visible. Task ids
/// are trimmed before use; a blank id matches nothing.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a fresh row. A duplicate id is a `Conflict`.
    async fn insert(&self, task: &TaskWrite) -> Result<(), AppError>;

    /// Upsert the lifecycle fields of one row under `policy`.
    async fn upsert(&self, write: &TaskWrite, policy: UpsertPolicy)
        -> Result<WriteOutcome, AppError>;

    async fn find_by_id(&self, task_id: &str) -> Result<Option<Task>, AppError>;

    /// Newest first. Returns the page and the total number of matches.
    async fn list(&self, filter: &TaskFilter, page: PageRequest)
        -> Result<(Vec<Task>, u64), AppError>;

    /// Set the client-edited content; returns affected rows.
    async fn update_content(&self, task_id: &str, content: &str) -> Result<u64, AppError>;

    async fn delete(&self, task_id: &str) -> Result<u64, AppError>;

    /// Delete every listed id that exists; returns affected rows.
    async fn delete_many(&self, task_ids: &[String]) -> Result<u64, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// Trimmed, non-blank ids in input order, duplicates removed.
pub(crate) fn normalize_ids(task_ids: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::with_capacity(task_ids.len());
    for id in task_ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    ids
}
