use crate::models::{PageRequest, Task, TaskFilter, TaskStatus};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

const DETAIL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LISTING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Query of `GET /interpretation/status/`. `task_name` and `company` are
/// required; the other values arrive as raw strings so that empty parameters
/// can mean "any".
#[derive(Debug, Default, Deserialize)]
pub struct StatusQueryParams {
    pub task_name: Option<String>,
    pub company: Option<String>,
    pub scene: Option<String>,
    pub status: Option<String>,
    pub created_before: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl StatusQueryParams {
    pub fn filter(&self) -> Result<TaskFilter, AppError> {
        let (Some(task_name), Some(company)) = (non_empty(&self.task_name), non_empty(&self.company))
        else {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Required query parameters: task_name, company"
            )));
        };
        Ok(TaskFilter {
            task_name: Some(task_name),
            company: Some(company),
            scene: non_empty(&self.scene),
            status: parse_status(&self.status)?,
            created_on_or_before: parse_day(&self.created_before, "created_before")?,
        })
    }

    pub fn page(&self) -> Result<PageRequest, AppError> {
        parse_page(&self.page, &self.page_size)
    }
}

/// Query of the `GET /forms/` listing.
#[derive(Debug, Default, Deserialize)]
pub struct FormsQueryParams {
    pub task_name: Option<String>,
    pub company: Option<String>,
    pub scene: Option<String>,
    pub status: Option<String>,
    pub create_time: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl FormsQueryParams {
    pub fn filter(&self) -> Result<TaskFilter, AppError> {
        Ok(TaskFilter {
            task_name: non_empty(&self.task_name),
            company: non_empty(&self.company),
            scene: non_empty(&self.scene),
            status: parse_status(&self.status)?,
            created_on_or_before: parse_day(&self.create_time, "create_time")?,
        })
    }

    pub fn page(&self) -> Result<PageRequest, AppError> {
        parse_page(&self.page, &self.page_size)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_status(value: &Option<String>) -> Result<Option<TaskStatus>, AppError> {
    non_empty(value)
        .map(|raw| raw.parse::<TaskStatus>())
        .transpose()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))
}

fn parse_day(value: &Option<String>, name: &str) -> Result<Option<NaiveDate>, AppError> {
    non_empty(value)
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
                AppError::BadRequest(anyhow::anyhow!(
                    "{} must be a date in YYYY-MM-DD format",
                    name
                ))
            })
        })
        .transpose()
}

fn parse_page(page: &Option<String>, page_size: &Option<String>) -> Result<PageRequest, AppError> {
    let number = |value: &Option<String>, name: &str| -> Result<Option<u32>, AppError> {
        non_empty(value)
            .map(|raw| {
                raw.parse::<u32>().map_err(|_| {
                    AppError::BadRequest(anyhow::anyhow!("{} must be a positive integer", name))
                })
            })
            .transpose()
    };
    Ok(PageRequest::new(
        number(page, "page")?,
        number(page_size, "page_size")?,
    ))
}

/// Full task as returned by the detail and status endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task_id: String,
    pub task_name: String,
    pub company: String,
    pub scene: String,
    pub progress: String,
    pub status: TaskStatus,
    pub status_label: String,
    pub result_content: Option<String>,
    pub edited_content: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Task> for TaskDetail {
    fn from(task: Task) -> Self {
        Self {
            progress: task.progress.to_string(),
            status_label: task.status.label().to_string(),
            created_at: format_time(task.created_at, DETAIL_TIME_FORMAT),
            updated_at: format_time(task.updated_at, DETAIL_TIME_FORMAT),
            task_id: task.task_id,
            task_name: task.task_name,
            company: task.company,
            scene: task.scene,
            status: task.status,
            result_content: task.result_content,
            edited_content: task.edited_content,
        }
    }
}

/// Row of the `/forms/` listing; content blobs are left out.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub task_name: String,
    pub company: String,
    pub scene: String,
    pub status: TaskStatus,
    pub status_label: String,
    pub progress: String,
    pub created_at: String,
}

impl From<Task> for TaskSummary {
    fn from(task: Task) -> Self {
        Self {
            progress: task.progress.to_string(),
            status_label: task.status.label().to_string(),
            created_at: format_time(task.created_at, LISTING_TIME_FORMAT),
            task_id: task.task_id,
            task_name: task.task_name,
            company: task.company,
            scene: task.scene,
            status: task.status,
        }
    }
}

/// Rendered in server local time, the clock task ids are stamped with.
fn format_time(at: DateTime<Utc>, format: &str) -> String {
    at.with_timezone(&Local).format(format).to_string()
}

#[derive(Debug, Serialize)]
pub struct StatusPage {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub data: Vec<TaskDetail>,
}

impl StatusPage {
    pub fn new(tasks: Vec<Task>, total: u64, page: PageRequest) -> Self {
        Self {
            total,
            page: page.page,
            page_size: page.page_size,
            total_pages: page.total_pages(total),
            data: tasks.into_iter().map(TaskDetail::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Serialize)]
pub struct FormsPage {
    pub data: Vec<TaskSummary>,
    pub pagination: Pagination,
}

impl FormsPage {
    pub fn new(tasks: Vec<Task>, total: u64, page: PageRequest) -> Self {
        let total_pages = page.total_pages(total);
        Self {
            data: tasks.into_iter().map(TaskSummary::from).collect(),
            pagination: Pagination {
                page: page.page,
                page_size: page.page_size,
                total,
                total_pages,
                has_next: u64::from(page.page) < total_pages,
                has_prev: page.page > 1,
            },
        }
    }
}

/// Success envelope: `{ "success": true, "data": ... }`.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateContentRequest {
    pub task_id: Option<String>,
    #[validate(required(message = "Missing required fields: task_id, content"))]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchDeleteRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "task_ids list is required"))]
    pub task_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchDeleteResponse {
    pub success: bool,
    pub message: String,
    pub deleted: u64,
}

impl BatchDeleteResponse {
    pub fn new(deleted: u64) -> Self {
        Self {
            success: true,
            message: format!("Deleted {} forms successfully", deleted),
            deleted,
        }
    }
}
