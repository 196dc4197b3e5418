use crate::config::SubmissionConfig;
use crate::models::TaskContext;
use serde::Serialize;
use service_core::error::AppError;

const CONTRACT_EXTENSIONS: &[&str] = &[".pdf"];
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg"];

/// A file part of the submission form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    fn has_extension(&self, extensions: &[&str]) -> bool {
        let name = self.file_name.to_lowercase();
        extensions.iter().any(|ext| name.ends_with(ext))
    }
}

/// Raw multipart submission, collected before validation.
#[derive(Debug, Clone, Default)]
pub struct SubmissionForm {
    pub task_name: Option<String>,
    pub company: Option<String>,
    pub scene: Option<String>,
    pub contract: Option<UploadedFile>,
    pub images: Vec<UploadedFile>,
}

impl SubmissionForm {
    /// Checks the form in a fixed order; the first failure is reported.
    pub fn validate(&self, limits: &SubmissionConfig) -> Result<TaskContext, AppError> {
        let field = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let (Some(task_name), Some(company), Some(scene)) =
            (field(&self.task_name), field(&self.company), field(&self.scene))
        else {
            return Err(bad_request(
                "Missing required fields: task_name, company, scene".to_string(),
            ));
        };

        if self.contract.is_none() && self.images.is_empty() {
            return Err(bad_request(
                "Please upload either a contract file, or images, or both".to_string(),
            ));
        }

        if let Some(contract) = &self.contract {
            if !contract.has_extension(CONTRACT_EXTENSIONS) {
                return Err(bad_request(format!(
                    "File {} must be PDF format",
                    contract.file_name
                )));
            }
        }

        if self.images.len() > limits.max_images {
            return Err(bad_request(format!(
                "Maximum {} image files allowed",
                limits.max_images
            )));
        }

        if let Some(image) = self
            .images
            .iter()
            .find(|image| !image.has_extension(IMAGE_EXTENSIONS))
        {
            return Err(bad_request(format!(
                "File {} must be PNG, JPG, or JPEG format",
                image.file_name
            )));
        }

        if let Some(file) = self
            .contract
            .iter()
            .chain(self.images.iter())
            .find(|file| file.data.len() > limits.max_file_bytes)
        {
            return Err(bad_request(format!(
                "File {} is too large (max {} MB)",
                file.file_name,
                limits.max_file_bytes / (1024 * 1024)
            )));
        }

        Ok(TaskContext {
            task_name,
            company,
            scene,
        })
    }
}

fn bad_request(message: String) -> AppError {
    AppError::BadRequest(anyhow::anyhow!(message))
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub success: bool,
    pub task_id: String,
    pub message: String,
}

impl SubmissionResponse {
    pub fn started(task_id: String) -> Self {
        Self {
            success: true,
            task_id,
            message: "Group order interpretation task started successfully".to_string(),
        }
    }
}
