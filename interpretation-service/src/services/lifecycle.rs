//! Lifecycle transitions of an interpretation task.

use crate::models::{Progress, TaskContext, TaskStatus, TaskWrite, UpsertPolicy, WriteOutcome};
use crate::services::store::TaskStore;
use service_core::error::AppError;
use std::sync::Arc;

/// Turns start/progress/success/error events into store upserts keyed by
/// task id.
#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn TaskStore>,
}

impl LifecycleService {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Put the task in `pending, 0%`, creating it if needed. Resets the
    /// attempt counter.
    pub async fn start(&self, task_id: &str, ctx: &TaskContext) -> Result<WriteOutcome, AppError> {
        let write = TaskWrite {
            task_id: task_id.to_string(),
            context: ctx.clone(),
            status: TaskStatus::Pending,
            progress: Progress::ZERO,
            result_content: None,
            attempt: 0,
        };
        self.record("start", write, UpsertPolicy::Reset).await
    }

    /// Never inserts: a missing row yields `Missing`.
    pub async fn progress(
        &self,
        task_id: &str,
        ctx: &TaskContext,
        progress: Progress,
        attempt: u32,
    ) -> Result<WriteOutcome, AppError> {
        let write = TaskWrite {
            task_id: task_id.to_string(),
            context: ctx.clone(),
            status: TaskStatus::Processing,
            progress,
            result_content: None,
            attempt: attempt_epoch(attempt),
        };
        self.record("progress", write, UpsertPolicy::Fenced).await
    }

    pub async fn success(
        &self,
        task_id: &str,
        ctx: &TaskContext,
        result: &str,
        attempt: u32,
    ) -> Result<WriteOutcome, AppError> {
        let write = TaskWrite {
            task_id: task_id.to_string(),
            context: ctx.clone(),
            status: TaskStatus::Succeeded,
            progress: Progress::COMPLETE,
            result_content: Some(result.to_string()),
            attempt: attempt_epoch(attempt),
        };
        self.record("success", write, UpsertPolicy::Fenced).await
    }

    /// Marks the task failed at `progress`, inserting the row when it is gone.
    pub async fn error(
        &self,
        task_id: &str,
        ctx: &TaskContext,
        progress: Progress,
        attempt: u32,
    ) -> Result<WriteOutcome, AppError> {
        let write = TaskWrite {
            task_id: task_id.to_string(),
            context: ctx.clone(),
            status: TaskStatus::Failed,
            progress,
            result_content: None,
            attempt: attempt_epoch(attempt),
        };
        self.record("error", write, UpsertPolicy::FencedOrInsert).await
    }

    async fn record(
        &self,
        event: &'static str,
        write: TaskWrite,
        policy: UpsertPolicy,
    ) -> Result<WriteOutcome, AppError> {
        match self.store.upsert(&write, policy).await {
            Ok(outcome) => {
                tracing::debug!(
                    task_id = %write.task_id,
                    event = event,
                    status = %write.status,
                    progress = %write.progress,
                    attempt = write.attempt,
                    outcome = ?outcome,
                    "Task lifecycle event recorded"
                );
                if outcome == WriteOutcome::Missing {
                    tracing::warn!(task_id = %write.task_id, event = event, "Task not found for lifecycle event");
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(
                    task_id = %write.task_id,
                    event = event,
                    error = %e,
                    "Failed to record task lifecycle event"
                );
                Err(e)
            }
        }
    }
}

fn attempt_epoch(attempt: u32) -> i32 {
    i32::try_from(attempt).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryTaskStore;

    fn ctx() -> TaskContext {
        TaskContext {
            task_name: "2025 renewal".to_string(),
            company: "acme".to_string(),
            scene: "medical".to_string(),
        }
    }

    fn service() -> LifecycleService {
        LifecycleService::new(Arc::new(MemoryTaskStore::new()))
    }

    fn pct(value: u8) -> Progress {
        Progress::new(value).unwrap()
    }

    #[tokio::test]
    async fn start_is_idempotent_and_resets() {
        let lifecycle = service();

        assert_eq!(lifecycle.start("T1", &ctx()).await.unwrap(), WriteOutcome::Inserted);
        lifecycle.progress("T1", &ctx(), pct(60), 1).await.unwrap();
        assert_eq!(lifecycle.start("T1", &ctx()).await.unwrap(), WriteOutcome::Updated);

        let task = lifecycle.store().find_by_id("T1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, Progress::ZERO);
        assert_eq!(task.attempt, 0);
    }

    #[tokio::test]
    async fn progress_on_missing_task_inserts_nothing() {
        let lifecycle = service();

        let outcome = lifecycle.progress("T404", &ctx(), pct(10), 0).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Missing);
        assert!(lifecycle.store().find_by_id("T404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn success_sets_result_and_full_progress() {
        let lifecycle = service();
        lifecycle.start("T1", &ctx()).await.unwrap();
        lifecycle.progress("T1", &ctx(), pct(90), 0).await.unwrap();

        lifecycle.success("T1", &ctx(), "{\"ok\":true}", 0).await.unwrap();

        let task = lifecycle.store().find_by_id("T1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.progress, Progress::COMPLETE);
        assert_eq!(task.result_content.as_deref(), Some("{\"ok\":true}"));
    }

    #[tokio::test]
    async fn error_creates_missing_task_as_failed() {
        let lifecycle = service();

        let outcome = lifecycle.error("T9", &ctx(), pct(20), 0).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Inserted);
        let task = lifecycle.store().find_by_id("T9").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.progress.to_string(), "20%");
        assert_eq!(task.company, "acme");
    }

    #[tokio::test]
    async fn write_from_older_attempt_is_stale() {
        let lifecycle = service();
        lifecycle.start("T1", &ctx()).await.unwrap();
        lifecycle.progress("T1", &ctx(), pct(10), 2).await.unwrap();

        let outcome = lifecycle.error("T1", &ctx(), pct(70), 1).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Stale);
        let task = lifecycle.store().find_by_id("T1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.progress.to_string(), "10%");
    }

    #[tokio::test]
    async fn succeeded_task_ignores_late_error_from_same_attempt() {
        let lifecycle = service();
        lifecycle.start("T1", &ctx()).await.unwrap();
        lifecycle.success("T1", &ctx(), "{}", 0).await.unwrap();

        let outcome = lifecycle.error("T1", &ctx(), pct(50), 0).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Stale);
        assert_eq!(
            lifecycle.store().find_by_id("T1").await.unwrap().unwrap().status,
            TaskStatus::Succeeded
        );
    }
}
