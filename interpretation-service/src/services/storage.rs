use async_trait::async_trait;
use service_core::error::AppError;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Blob storage for uploaded documents, addressed by relative keys such as
/// `uploads/<task_id>/contract.pdf`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), AppError>;
    async fn exists(&self, key: &str) -> Result<bool, AppError>;
    /// Remove everything under `prefix`. Missing prefixes are not an error.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), AppError>;
}

pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
        }
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, AppError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid storage key: {}",
                key
            )));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), AppError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        tracing::debug!(key = key, path = ?path, "Stored upload");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let path = self.resolve(key)?;
        Ok(fs::try_exists(path).await?)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), AppError> {
        let path = self.resolve(prefix)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Directory holding a task's uploads.
pub fn task_upload_dir(task_id: &str) -> String {
    format!("uploads/{}", task_id)
}

pub fn contract_key(task_id: &str) -> String {
    format!("{}/contract.pdf", task_upload_dir(task_id))
}

/// Key of the `n`th image, counting from 1.
pub fn image_key(task_id: &str, n: usize) -> String {
    format!("{}/quote_{}.png", task_upload_dir(task_id), n)
}
