//! PostgreSQL task store.

use crate::models::{
    FenceState, PageRequest, Task, TaskFilter, TaskWrite, UpsertPolicy, WriteOutcome,
};
use crate::services::store::{normalize_ids, TaskStore};
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

const TASK_COLUMNS: &str = "task_id, task_name, company, scene, progress, status, \
     result_content, edited_content, attempt, created_at, updated_at";

/// Listing predicate shared by the page and count queries. Binds:
/// $1 task_name substring, $2 company, $3 scene, $4 status, $5 day.
const LIST_FILTER: &str = r#"
    WHERE ($1::varchar IS NULL OR strpos(task_name, $1) > 0)
      AND ($2::varchar IS NULL OR company = $2)
      AND ($3::varchar IS NULL OR scene = $3)
      AND ($4::varchar IS NULL OR status = $4)
      AND ($5::timestamptz IS NULL OR created_at < $5)
"#;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "interpretation-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, AppError> {
        self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }

    async fn insert_row(
        tx: &mut Transaction<'_, Postgres>,
        write: &TaskWrite,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO interpretation_tasks
                (task_id, task_name, company, scene, progress, status, result_content, attempt)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&write.task_id)
        .bind(&write.context.task_name)
        .bind(&write.context.company)
        .bind(&write.context.scene)
        .bind(write.progress.to_string())
        .bind(write.status.as_str())
        .bind(write.result_content.as_deref())
        .bind(write.attempt)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn update_row(
        tx: &mut Transaction<'_, Postgres>,
        write: &TaskWrite,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE interpretation_tasks
            SET task_name = $2,
                company = $3,
                scene = $4,
                progress = $5,
                status = $6,
                result_content = COALESCE($7, result_content),
                attempt = $8,
                updated_at = NOW()
            WHERE task_id = $1
            "#,
        )
        .bind(&write.task_id)
        .bind(&write.context.task_name)
        .bind(&write.context.company)
        .bind(&write.context.scene)
        .bind(write.progress.to_string())
        .bind(write.status.as_str())
        .bind(write.result_content.as_deref())
        .bind(write.attempt)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}

fn db_error(operation: &str, task_id: &str, e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(anyhow::anyhow!("Task {} already exists", task_id))
        }
        _ => {
            tracing::error!(task_id = %task_id, operation = operation, error = %e, "Database operation failed");
            AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", operation, e))
        }
    }
}

fn record_query(operation: &'static str, start: Instant) {
    metrics::histogram!("interpretation_db_query_duration_seconds", "operation" => operation)
        .record(start.elapsed().as_secs_f64());
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[instrument(skip(self, task), fields(task_id = %task.task_id))]
    async fn insert(&self, task: &TaskWrite) -> Result<(), AppError> {
        let start = Instant::now();
        let mut tx = self.begin().await?;
        Self::insert_row(&mut tx, task)
            .await
            .map_err(|e| db_error("insert task", &task.task_id, e))?;
        tx.commit()
            .await
            .map_err(|e| db_error("commit insert", &task.task_id, e))?;
        record_query("insert", start);
        Ok(())
    }

    #[instrument(skip(self, write), fields(task_id = %write.task_id, status = %write.status, attempt = write.attempt))]
    async fn upsert(
        &self,
        write: &TaskWrite,
        policy: UpsertPolicy,
    ) -> Result<WriteOutcome, AppError> {
        let start = Instant::now();
        let task_id = write.task_id.as_str();
        let mut tx = self.begin().await?;

        let current = sqlx::query_as::<_, FenceState>(
            r#"
            SELECT attempt, status, progress
            FROM interpretation_tasks
            WHERE task_id = $1
            FOR UPDATE
            "#,
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("lock task", task_id, e))?;

        let outcome = match (policy, current) {
            (UpsertPolicy::Reset, current) => {
                sqlx::query(
                    r#"
                    INSERT INTO interpretation_tasks
                        (task_id, task_name, company, scene, progress, status, result_content, attempt)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (task_id) DO UPDATE
                    SET task_name = EXCLUDED.task_name,
                        company = EXCLUDED.company,
                        scene = EXCLUDED.scene,
                        progress = EXCLUDED.progress,
                        status = EXCLUDED.status,
                        result_content = COALESCE(EXCLUDED.result_content, interpretation_tasks.result_content),
                        attempt = EXCLUDED.attempt,
                        updated_at = NOW()
                    "#,
                )
                .bind(task_id)
                .bind(&write.context.task_name)
                .bind(&write.context.company)
                .bind(&write.context.scene)
                .bind(write.progress.to_string())
                .bind(write.status.as_str())
                .bind(write.result_content.as_deref())
                .bind(write.attempt)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("reset task", task_id, e))?;

                if current.is_some() {
                    WriteOutcome::Updated
                } else {
                    WriteOutcome::Inserted
                }
            }
            (UpsertPolicy::Fenced, None) => WriteOutcome::Missing,
            (UpsertPolicy::FencedOrInsert, None) => {
                Self::insert_row(&mut tx, write)
                    .await
                    .map_err(|e| db_error("insert task", task_id, e))?;
                WriteOutcome::Inserted
            }
            (_, Some(current)) if !write.is_admitted_over(&current) => {
                warn!(
                    current_attempt = current.attempt,
                    current_status = %current.status,
                    "Rejected stale task write"
                );
                WriteOutcome::Stale
            }
            (_, Some(_)) => {
                Self::update_row(&mut tx, write)
                    .await
                    .map_err(|e| db_error("update task", task_id, e))?;
                WriteOutcome::Updated
            }
        };

        tx.commit()
            .await
            .map_err(|e| db_error("commit upsert", task_id, e))?;
        record_query("upsert", start);

        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, task_id: &str) -> Result<Option<Task>, AppError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Ok(None);
        }

        let start = Instant::now();
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM interpretation_tasks WHERE task_id = $1",
            TASK_COLUMNS
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get task", task_id, e))?;
        record_query("find_by_id", start);

        Ok(task)
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
    ) -> Result<(Vec<Task>, u64), AppError> {
        let start = Instant::now();
        let status = filter.status.map(|s| s.as_str());
        let created_before = filter.created_before_instant();

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM interpretation_tasks {}",
            LIST_FILTER
        ))
        .bind(filter.task_name.as_deref())
        .bind(filter.company.as_deref())
        .bind(filter.scene.as_deref())
        .bind(status)
        .bind(created_before)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("count tasks", "-", e))?;

        let tasks = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM interpretation_tasks {} ORDER BY created_at DESC, id DESC LIMIT $6 OFFSET $7",
            TASK_COLUMNS, LIST_FILTER
        ))
        .bind(filter.task_name.as_deref())
        .bind(filter.company.as_deref())
        .bind(filter.scene.as_deref())
        .bind(status)
        .bind(created_before)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list tasks", "-", e))?;
        record_query("list", start);

        Ok((tasks, total.max(0) as u64))
    }

    #[instrument(skip(self, content), fields(content_len = content.len()))]
    async fn update_content(&self, task_id: &str, content: &str) -> Result<u64, AppError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE interpretation_tasks
            SET edited_content = $2, updated_at = NOW()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(content)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("update content", task_id, e))?;
        tx.commit()
            .await
            .map_err(|e| db_error("commit content update", task_id, e))?;
        record_query("update_content", start);

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete(&self, task_id: &str) -> Result<u64, AppError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let mut tx = self.begin().await?;
        let result = sqlx::query("DELETE FROM interpretation_tasks WHERE task_id = $1")
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("delete task", task_id, e))?;
        tx.commit()
            .await
            .map_err(|e| db_error("commit delete", task_id, e))?;
        record_query("delete", start);

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, task_ids), fields(requested = task_ids.len()))]
    async fn delete_many(&self, task_ids: &[String]) -> Result<u64, AppError> {
        let ids = normalize_ids(task_ids);
        if ids.is_empty() {
            warn!("No valid task ids provided for batch delete");
            return Ok(0);
        }

        let start = Instant::now();
        let mut tx = self.begin().await?;
        let result = sqlx::query("DELETE FROM interpretation_tasks WHERE task_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("delete tasks", "-", e))?;
        tx.commit()
            .await
            .map_err(|e| db_error("commit batch delete", "-", e))?;
        record_query("delete_many", start);

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}
