use crate::config::{InterpretationConfig, StoreBackend};
use crate::handlers;
use crate::services::{
    LifecycleService, LocalStorage, MemoryTaskStore, PgTaskStore, Storage, TaskStore,
};
use crate::workers::{Interpreter, JobQueue, MockInterpreter, WorkerOrchestrator};
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Multipart overhead allowed on top of the uploaded files themselves.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: InterpretationConfig,
    pub store: Arc<dyn TaskStore>,
    pub lifecycle: LifecycleService,
    pub storage: Arc<dyn Storage>,
    pub queue: JobQueue,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    orchestrator: WorkerOrchestrator,
    state: AppState,
}

impl Application {
    pub async fn build(config: InterpretationConfig) -> Result<Self, AppError> {
        Self::build_with(config, None).await
    }

    /// Build with a custom interpreter in place of the mock one.
    pub async fn build_with(
        config: InterpretationConfig,
        interpreter: Option<Arc<dyn Interpreter>>,
    ) -> Result<Self, AppError> {
        let store = connect_store(&config).await?;
        Self::build_with_store(config, store, interpreter).await
    }

    /// Build around an already connected task store.
    pub async fn build_with_store(
        config: InterpretationConfig,
        store: Arc<dyn TaskStore>,
        interpreter: Option<Arc<dyn Interpreter>>,
    ) -> Result<Self, AppError> {
        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(&config.storage.local_path)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "Failed to initialize local storage at {}: {}",
                        config.storage.local_path,
                        e
                    );
                    e
                })?,
        );

        let interpreter = interpreter.unwrap_or_else(|| {
            Arc::new(MockInterpreter::new(&config.worker, storage.clone()))
        });

        let lifecycle = LifecycleService::new(store.clone());
        let (orchestrator, queue) =
            WorkerOrchestrator::new(config.worker.clone(), lifecycle.clone(), interpreter);

        let state = AppState {
            config: config.clone(),
            store,
            lifecycle,
            storage,
            queue,
        };

        let router = build_router(state.clone());

        // Port 0 binds a random port for tests
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port = port,
            backend = ?config.database.backend,
            "Interpretation service listening"
        );

        Ok(Self {
            port,
            listener,
            router,
            orchestrator,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.state.store.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Serve HTTP and run the worker pool until `shutdown` resolves.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let worker_shutdown = self.orchestrator.shutdown_token();
        let workers = self.orchestrator.start();

        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await;

        worker_shutdown.cancel();
        if let Err(e) = workers.await {
            tracing::error!(error = %e, "Worker dispatcher ended abnormally");
        }
        tracing::info!("Interpretation service stopped");

        result
    }
}

async fn connect_store(config: &InterpretationConfig) -> Result<Arc<dyn TaskStore>, AppError> {
    match config.database.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory task store; data is lost on restart");
            Ok(Arc::new(MemoryTaskStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config.database.url.as_deref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required but not set"))
            })?;
            let db = PgTaskStore::new(
                url,
                config.database.max_connections,
                config.database.min_connections,
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to PostgreSQL: {}", e);
                e
            })?;
            db.run_migrations().await.map_err(|e| {
                tracing::error!("Failed to run database migrations: {}", e);
                e
            })?;
            Ok(Arc::new(db))
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let submission = &state.config.submission;
    let body_limit = submission
        .max_file_bytes
        .saturating_mul(submission.max_images.saturating_add(1))
        .saturating_add(FORM_OVERHEAD_BYTES);

    Router::new()
        .route(
            "/interpretation/start/",
            post(handlers::start_interpretation),
        )
        .route("/interpretation/status/", get(handlers::query_status))
        .route("/forms/", get(handlers::list_forms))
        .route("/forms/delete-batch/", delete(handlers::delete_forms_batch))
        .route("/forms/:task_id/", get(handlers::get_form))
        .route("/forms/:task_id/update/", post(handlers::update_form))
        .route("/forms/:task_id/delete/", delete(handlers::delete_form))
        .route("/health/", get(handlers::health_check))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
