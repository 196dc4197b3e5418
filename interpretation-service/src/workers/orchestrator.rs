use crate::config::WorkerConfig;
use crate::models::{Progress, WriteOutcome};
use crate::services::LifecycleService;
use crate::workers::interpreter::{Interpreter, StepOutcome};
use crate::workers::job::{Delivery, InterpretationJob};
use crate::workers::retry::RetryPolicy;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Producer side of the job queue, shared with the HTTP handlers.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Delivery>,
}

impl JobQueue {
    /// Enqueue the first delivery of `job` without waiting.
    pub fn enqueue(&self, job: InterpretationJob) -> Result<(), AppError> {
        let task_id = job.task_id.clone();
        self.tx.try_send(Delivery::first(job)).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "Job queue full",
                mpsc::error::TrySendError::Closed(_) => "Job queue closed",
            };
            tracing::error!(task_id = %task_id, reason = reason, "Failed to enqueue interpretation job");
            AppError::InternalError(anyhow::anyhow!(reason))
        })
    }

    /// Push `delivery` back after `delay`, unless shut down first.
    fn redeliver(&self, delivery: Delivery, delay: Duration, shutdown: CancellationToken) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(
                        task_id = %delivery.job.task_id,
                        attempt = delivery.attempt,
                        "Shutdown before redelivery"
                    );
                }
                _ = tokio::time::sleep(delay) => {
                    let task_id = delivery.job.task_id.clone();
                    let attempt = delivery.attempt;
                    if tx.send(delivery).await.is_err() {
                        tracing::error!(task_id = %task_id, attempt = attempt, "Job queue closed, redelivery dropped");
                    }
                }
            }
        });
    }
}

/// How one delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed { reason: String, retryable: bool },
    /// A newer attempt (or a terminal success) owns the task now.
    Superseded,
}

pub struct WorkerOrchestrator {
    config: WorkerConfig,
    lifecycle: LifecycleService,
    interpreter: Arc<dyn Interpreter>,
    queue: JobQueue,
    job_rx: mpsc::Receiver<Delivery>,
    shutdown_token: CancellationToken,
}

impl WorkerOrchestrator {
    pub fn new(
        config: WorkerConfig,
        lifecycle: LifecycleService,
        interpreter: Arc<dyn Interpreter>,
    ) -> (Self, JobQueue) {
        let (tx, job_rx) = mpsc::channel(config.queue_size.max(1));
        let queue = JobQueue { tx };

        let orchestrator = Self {
            config,
            lifecycle,
            interpreter,
            queue: queue.clone(),
            job_rx,
            shutdown_token: CancellationToken::new(),
        };

        (orchestrator, queue)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn the dispatcher. Deliveries run concurrently, at most
    /// `worker_count` at a time.
    pub fn start(self) -> JoinHandle<()> {
        let Self {
            config,
            lifecycle,
            interpreter,
            queue,
            mut job_rx,
            shutdown_token,
        } = self;

        if !config.enabled {
            tracing::info!("Worker pool disabled by configuration");
            // Jobs stay queued, like a broker with no consumers.
            return tokio::spawn(async move {
                shutdown_token.cancelled().await;
                drop(job_rx);
            });
        }

        tracing::info!(
            worker_count = config.worker_count,
            queue_size = config.queue_size,
            max_retries = config.max_retries,
            "Starting worker pool"
        );

        let worker = Worker {
            lifecycle,
            interpreter,
            queue,
            retry: RetryPolicy::new(config.max_retries, config.retry_base_delay()),
            shutdown: shutdown_token.clone(),
        };
        let permits = Arc::new(Semaphore::new(config.worker_count.max(1)));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => {
                        tracing::info!("Job dispatcher shutting down");
                        break;
                    }
                    delivery = job_rx.recv() => {
                        let Some(delivery) = delivery else {
                            tracing::info!("Channel closed, job dispatcher exiting");
                            break;
                        };

                        let permit = match permits.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        };

                        tracing::info!(
                            task_id = %delivery.job.task_id,
                            attempt = delivery.attempt,
                            "Dispatching interpretation job"
                        );

                        let worker = worker.clone();
                        tokio::spawn(async move {
                            worker.process(delivery).await;
                            drop(permit);
                        });
                    }
                }
            }
        })
    }
}

#[derive(Clone)]
struct Worker {
    lifecycle: LifecycleService,
    interpreter: Arc<dyn Interpreter>,
    queue: JobQueue,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl Worker {
    async fn process(&self, delivery: Delivery) {
        let task_id = delivery.job.task_id.clone();
        let attempt = delivery.attempt;
        let start = Instant::now();

        tracing::info!(task_id = %task_id, attempt = attempt, "Interpretation started");
        metrics::counter!("interpretation_jobs_total").increment(1);

        let outcome = self.run(&delivery).await;
        metrics::histogram!("interpretation_job_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match outcome {
            RunOutcome::Succeeded => {
                metrics::counter!("interpretation_jobs_succeeded_total").increment(1);
                tracing::info!(
                    task_id = %task_id,
                    attempt = attempt,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Interpretation succeeded"
                );
            }
            RunOutcome::Superseded => {
                tracing::info!(task_id = %task_id, attempt = attempt, "Interpretation superseded");
            }
            RunOutcome::Failed { reason, retryable } => {
                match self.retry.next_delay(attempt).filter(|_| retryable) {
                    Some(delay) => {
                        metrics::counter!("interpretation_jobs_retried_total").increment(1);
                        tracing::warn!(
                            task_id = %task_id,
                            attempt = attempt,
                            delay_secs = delay.as_secs_f64(),
                            error = %reason,
                            "Interpretation failed, scheduling retry"
                        );
                        self.queue
                            .redeliver(delivery.next(), delay, self.shutdown.clone());
                    }
                    None => {
                        metrics::counter!("interpretation_jobs_failed_total").increment(1);
                        tracing::error!(
                            task_id = %task_id,
                            attempt = attempt,
                            retryable = retryable,
                            error = %reason,
                            "Interpretation failed after {} retries",
                            self.retry.max_retries
                        );
                    }
                }
            }
        }
    }

    /// Drive the interpreter through every step of one delivery.
    async fn run(&self, delivery: &Delivery) -> RunOutcome {
        let job = &delivery.job;
        let attempt = delivery.attempt;
        let mut last_progress = Progress::ZERO;
        let mut step = 1u32;

        let failure = loop {
            match self.interpreter.step(job, step).await {
                StepOutcome::Continue(progress) => {
                    match self
                        .lifecycle
                        .progress(&job.task_id, &job.context, progress, attempt)
                        .await
                    {
                        Ok(WriteOutcome::Stale) => return RunOutcome::Superseded,
                        Ok(_) => {}
                        Err(e) => {
                            break (format!("Failed to record progress: {}", e), true);
                        }
                    }
                    tracing::info!(task_id = %job.task_id, progress = %progress, "Task progress");
                    last_progress = progress;
                    step += 1;
                }
                StepOutcome::Succeeded(payload) => {
                    let content = match serde_json::to_string_pretty(&payload) {
                        Ok(content) => content,
                        Err(e) => break (format!("Failed to encode result: {}", e), false),
                    };
                    match self
                        .lifecycle
                        .success(&job.task_id, &job.context, &content, attempt)
                        .await
                    {
                        Ok(WriteOutcome::Stale) => return RunOutcome::Superseded,
                        Ok(_) => return RunOutcome::Succeeded,
                        Err(e) => break (format!("Failed to record result: {}", e), true),
                    }
                }
                StepOutcome::Faulted { progress, reason } => {
                    match self
                        .lifecycle
                        .progress(&job.task_id, &job.context, progress, attempt)
                        .await
                    {
                        Ok(WriteOutcome::Stale) => return RunOutcome::Superseded,
                        Ok(_) => last_progress = progress,
                        Err(e) => {
                            tracing::warn!(task_id = %job.task_id, error = %e, "Failed to record progress before fault");
                        }
                    }
                    break (reason, true);
                }
                StepOutcome::Failed { reason, retryable } => break (reason, retryable),
            }
        };

        let (reason, retryable) = failure;
        tracing::error!(
            task_id = %job.task_id,
            attempt = attempt,
            progress = %last_progress,
            error = %reason,
            "Interpretation attempt failed"
        );

        match self
            .lifecycle
            .error(&job.task_id, &job.context, last_progress, attempt)
            .await
        {
            Ok(WriteOutcome::Stale) => RunOutcome::Superseded,
            // Already logged by the lifecycle service; the retry still runs.
            Ok(_) | Err(_) => RunOutcome::Failed { reason, retryable },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskContext, TaskStatus};
    use crate::services::MemoryTaskStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedInterpreter {
        fail_first_attempts: u32,
        first_steps: AtomicU32,
    }

    #[async_trait]
    impl Interpreter for ScriptedInterpreter {
        async fn step(&self, _job: &InterpretationJob, step: u32) -> StepOutcome {
            if step == 1 {
                let seen = self.first_steps.fetch_add(1, Ordering::SeqCst);
                if seen < self.fail_first_attempts {
                    return StepOutcome::retryable("scripted failure");
                }
            }
            match step {
                1..=2 => StepOutcome::Continue(Progress::from_step(step, 2)),
                _ => StepOutcome::Succeeded(serde_json::json!({ "ok": true })),
            }
        }
    }

    fn job() -> InterpretationJob {
        InterpretationJob {
            task_id: "T1".to_string(),
            context: TaskContext {
                task_name: "renewal".to_string(),
                company: "acme".to_string(),
                scene: "medical".to_string(),
            },
            contract_path: None,
            image_paths: Vec::new(),
        }
    }

    fn worker(interpreter: Arc<dyn Interpreter>, max_retries: u32) -> (Worker, LifecycleService) {
        let lifecycle = LifecycleService::new(Arc::new(MemoryTaskStore::new()));
        let (tx, _rx) = mpsc::channel(4);
        let worker = Worker {
            lifecycle: lifecycle.clone(),
            interpreter,
            queue: JobQueue { tx },
            retry: RetryPolicy::new(max_retries, Duration::ZERO),
            shutdown: CancellationToken::new(),
        };
        (worker, lifecycle)
    }

    #[tokio::test]
    async fn successful_run_records_result() {
        let interpreter = Arc::new(ScriptedInterpreter {
            fail_first_attempts: 0,
            first_steps: AtomicU32::new(0),
        });
        let (worker, lifecycle) = worker(interpreter, 3);
        lifecycle.start("T1", &job().context).await.unwrap();

        let outcome = worker.run(&Delivery::first(job())).await;

        assert_eq!(outcome, RunOutcome::Succeeded);
        let task = lifecycle.store().find_by_id("T1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.progress, Progress::COMPLETE);
        assert!(task.result_content.unwrap().contains("\"ok\": true"));
    }

    #[tokio::test]
    async fn failed_run_marks_task_failed_at_last_progress() {
        struct FailsAtTwo;

        #[async_trait]
        impl Interpreter for FailsAtTwo {
            async fn step(&self, _job: &InterpretationJob, step: u32) -> StepOutcome {
                match step {
                    1 => StepOutcome::Continue(Progress::from_step(1, 4)),
                    _ => StepOutcome::fatal("bad input"),
                }
            }
        }

        let (worker, lifecycle) = worker(Arc::new(FailsAtTwo), 3);
        lifecycle.start("T1", &job().context).await.unwrap();

        let outcome = worker.run(&Delivery::first(job())).await;

        assert_eq!(
            outcome,
            RunOutcome::Failed {
                reason: "bad input".to_string(),
                retryable: false
            }
        );
        let task = lifecycle.store().find_by_id("T1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.progress.to_string(), "25%");
    }

    #[tokio::test]
    async fn fault_fails_at_the_progress_its_step_reached() {
        struct FaultsAtTwo;

        #[async_trait]
        impl Interpreter for FaultsAtTwo {
            async fn step(&self, _job: &InterpretationJob, step: u32) -> StepOutcome {
                match step {
                    1 => StepOutcome::Continue(Progress::from_step(1, 2)),
                    _ => StepOutcome::Faulted {
                        progress: Progress::from_step(2, 2),
                        reason: "transient fault".to_string(),
                    },
                }
            }
        }

        let (worker, lifecycle) = worker(Arc::new(FaultsAtTwo), 3);
        lifecycle.start("T1", &job().context).await.unwrap();

        let outcome = worker.run(&Delivery::first(job())).await;

        assert_eq!(
            outcome,
            RunOutcome::Failed {
                reason: "transient fault".to_string(),
                retryable: true
            }
        );
        let task = lifecycle.store().find_by_id("T1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.progress, Progress::COMPLETE);
    }

    #[tokio::test]
    async fn older_attempt_is_superseded() {
        let interpreter = Arc::new(ScriptedInterpreter {
            fail_first_attempts: 0,
            first_steps: AtomicU32::new(0),
        });
        let (worker, lifecycle) = worker(interpreter, 3);
        lifecycle.start("T1", &job().context).await.unwrap();
        lifecycle
            .progress("T1", &job().context, Progress::from_step(1, 10), 2)
            .await
            .unwrap();

        let stale = Delivery {
            job: job(),
            attempt: 1,
        };
        assert_eq!(worker.run(&stale).await, RunOutcome::Superseded);

        let task = lifecycle.store().find_by_id("T1").await.unwrap().unwrap();
        assert_eq!(task.attempt, 2);
        assert_eq!(task.status, TaskStatus::Processing);
    }
}
