use serde::Deserialize;
use service_core::config::{self as core_config, get_env, is_production, parse_env};
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct InterpretationConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub submission: SubmissionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid database backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub local_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_count: usize,
    pub queue_size: usize,
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
    pub total_steps: u32,
    pub step_delay_min_ms: u64,
    pub step_delay_max_ms: u64,
    /// Probability in `[0, 1]` that a step fails with a synthetic fault.
    pub fault_rate: f64,
}

impl WorkerConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }

    pub fn step_delay_range(&self) -> (Duration, Duration) {
        let min = self.step_delay_min_ms.min(self.step_delay_max_ms);
        let max = self.step_delay_min_ms.max(self.step_delay_max_ms);
        (Duration::from_millis(min), Duration::from_millis(max))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_count: 4,
            queue_size: 100,
            max_retries: 3,
            retry_base_delay_secs: 60,
            total_steps: 10,
            step_delay_min_ms: 1000,
            step_delay_max_ms: 3000,
            fault_rate: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    pub max_images: usize,
    pub max_file_bytes: usize,
    /// Fail the submission when the initial task row cannot be written.
    pub strict_persistence: bool,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_images: 30,
            max_file_bytes: 20 * 1024 * 1024,
            strict_persistence: false,
        }
    }
}

impl InterpretationConfig {
    pub fn load() -> Result<Self, AppError> {
        // Common config handles .env and the APP__ prefix
        let common = core_config::Config::load()?;
        let is_prod = is_production();
        let defaults = WorkerConfig::default();
        let submission = SubmissionConfig::default();

        let backend: StoreBackend = get_env("DATABASE_BACKEND", Some("postgres"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let url = match backend {
            StoreBackend::Postgres => Some(get_env("DATABASE_URL", None, is_prod)?),
            StoreBackend::Memory => env::var("DATABASE_URL").ok(),
        };

        let config = InterpretationConfig {
            common,
            service_name: get_env("SERVICE_NAME", Some("interpretation-service"), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                backend,
                url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            storage: StorageConfig {
                local_path: get_env("STORAGE_LOCAL_PATH", Some("media"), is_prod)?,
            },
            worker: WorkerConfig {
                enabled: parse_env("WORKER_ENABLED", defaults.enabled)?,
                worker_count: parse_env("WORKER_COUNT", defaults.worker_count)?,
                queue_size: parse_env("WORKER_QUEUE_SIZE", defaults.queue_size)?,
                max_retries: parse_env("WORKER_MAX_RETRIES", defaults.max_retries)?,
                retry_base_delay_secs: parse_env(
                    "WORKER_RETRY_BASE_DELAY_SECS",
                    defaults.retry_base_delay_secs,
                )?,
                total_steps: parse_env("WORKER_TOTAL_STEPS", defaults.total_steps)?,
                step_delay_min_ms: parse_env(
                    "WORKER_STEP_DELAY_MIN_MS",
                    defaults.step_delay_min_ms,
                )?,
                step_delay_max_ms: parse_env(
                    "WORKER_STEP_DELAY_MAX_MS",
                    defaults.step_delay_max_ms,
                )?,
                fault_rate: parse_env("WORKER_FAULT_RATE", defaults.fault_rate)?,
            },
            submission: SubmissionConfig {
                max_images: parse_env("SUBMISSION_MAX_IMAGES", submission.max_images)?,
                max_file_bytes: parse_env("SUBMISSION_MAX_FILE_BYTES", submission.max_file_bytes)?,
                strict_persistence: parse_env(
                    "SUBMISSION_STRICT_PERSISTENCE",
                    submission.strict_persistence,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: &str| Err(AppError::ConfigError(anyhow::anyhow!(msg.to_string())));

        if self.worker.worker_count == 0 {
            return invalid("WORKER_COUNT must be at least 1");
        }
        if self.worker.queue_size == 0 {
            return invalid("WORKER_QUEUE_SIZE must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.worker.fault_rate) {
            return invalid("WORKER_FAULT_RATE must be between 0 and 1");
        }
        if self.submission.max_images == 0 {
            return invalid("SUBMISSION_MAX_IMAGES must be at least 1");
        }
        Ok(())
    }
}
