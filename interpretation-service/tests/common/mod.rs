//! Common test utilities for interpretation-service integration tests.
#![allow(dead_code)]

use interpretation_service::config::{
    DatabaseConfig, InterpretationConfig, StorageConfig, StoreBackend, SubmissionConfig,
    WorkerConfig,
};
use interpretation_service::models::{Task, TaskStatus};
use interpretation_service::services::TaskStore;
use interpretation_service::startup::Application;
use interpretation_service::workers::Interpreter;
use reqwest::multipart;
use serde_json::Value;
use service_core::config::Config as CommonConfig;
use std::sync::{Arc, Once};
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,interpretation_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// In-memory store, temp storage dir, instant mock steps, no faults.
pub fn test_config() -> InterpretationConfig {
    InterpretationConfig {
        common: CommonConfig { port: 0 },
        service_name: "interpretation-service-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            backend: StoreBackend::Memory,
            url: None,
            max_connections: 2,
            min_connections: 1,
        },
        storage: StorageConfig {
            local_path: format!("target/test-storage-{}", Uuid::new_v4()),
        },
        worker: WorkerConfig {
            worker_count: 2,
            queue_size: 16,
            retry_base_delay_secs: 0,
            total_steps: 5,
            step_delay_min_ms: 0,
            step_delay_max_ms: 0,
            fault_rate: 0.0,
            ..Default::default()
        },
        submission: SubmissionConfig::default(),
    }
}

pub struct TestApp {
    pub address: String,
    pub store: Arc<dyn TaskStore>,
    pub client: reqwest::Client,
    storage_path: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config(), None).await
    }

    pub async fn spawn_with(
        config: InterpretationConfig,
        interpreter: Option<Arc<dyn Interpreter>>,
    ) -> Self {
        init_tracing();

        let storage_path = config.storage.local_path.clone();
        let app = Application::build_with(config, interpreter)
            .await
            .expect("Failed to build application");
        Self::serve(app, storage_path).await
    }

    /// Spawn around a caller-provided task store.
    pub async fn spawn_with_store(
        config: InterpretationConfig,
        store: Arc<dyn TaskStore>,
        interpreter: Option<Arc<dyn Interpreter>>,
    ) -> Self {
        init_tracing();

        let storage_path = config.storage.local_path.clone();
        let app = Application::build_with_store(config, store, interpreter)
            .await
            .expect("Failed to build application");
        Self::serve(app, storage_path).await
    }

    async fn serve(app: Application, storage_path: String) -> Self {
        let address = format!("http://127.0.0.1:{}", app.port());
        let store = app.store();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();

        // Wait for the server to accept connections
        let mut attempts = 0;
        loop {
            match client.get(format!("{}/health/", address)).send().await {
                Ok(_) => break,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Server did not start after 20 attempts: {}", e),
            }
        }

        Self {
            address,
            store,
            client,
            storage_path,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub fn storage_path(&self) -> &str {
        &self.storage_path
    }

    /// Task ids that still have an upload directory.
    pub fn upload_dirs(&self) -> Vec<String> {
        match std::fs::read_dir(std::path::Path::new(&self.storage_path).join("uploads")) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn submit(&self, form: multipart::Form) -> reqwest::Response {
        self.client
            .post(self.url("/interpretation/start/"))
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_json(&self, path: &str) -> (reqwest::StatusCode, Value) {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status();
        (status, response.json().await.expect("Failed to parse JSON"))
    }

    /// Poll the store until the task reaches a terminal status.
    pub async fn wait_for_terminal(&self, task_id: &str) -> Task {
        for _ in 0..200 {
            if let Some(task) = self.store.find_by_id(task_id).await.unwrap() {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("Task {} did not finish in time", task_id);
    }

    /// Poll until the task has `status` at `attempt`.
    pub async fn wait_for(&self, task_id: &str, status: TaskStatus, attempt: i32) -> Task {
        for _ in 0..200 {
            if let Some(task) = self.store.find_by_id(task_id).await.unwrap() {
                if task.status == status && task.attempt == attempt {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("Task {} never reached {} at attempt {}", task_id, status, attempt);
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.storage_path);
    }
}

pub fn pdf_part(name: &str) -> multipart::Part {
    multipart::Part::bytes(b"%PDF-1.4 test".to_vec())
        .file_name(name.to_string())
        .mime_str("application/pdf")
        .unwrap()
}

pub fn png_part(name: &str) -> multipart::Part {
    multipart::Part::bytes(vec![0x89, b'P', b'N', b'G'])
        .file_name(name.to_string())
        .mime_str("image/png")
        .unwrap()
}

pub fn base_form(task_name: &str, company: &str, scene: &str) -> multipart::Form {
    multipart::Form::new()
        .text("task_name", task_name.to_string())
        .text("company", company.to_string())
        .text("scene", scene.to_string())
}

/// Submit a valid contract-only form and return the new task id.
pub async fn submit_contract(app: &TestApp, task_name: &str, company: &str) -> String {
    let form = base_form(task_name, company, "medical").part("pdf_file", pdf_part("contract.pdf"));
    let response = app.submit(form).await;
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    body["task_id"].as_str().unwrap().to_string()
}
