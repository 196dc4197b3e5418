use crate::dtos::{
    BatchDeleteRequest, BatchDeleteResponse, DataResponse, FormsPage, FormsQueryParams,
    MessageResponse, TaskDetail, UpdateContentRequest,
};
use crate::services::storage::task_upload_dir;
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

fn task_not_found() -> AppError {
    AppError::NotFound(anyhow::anyhow!("Task not found"))
}

/// `GET /forms/`
pub async fn list_forms(
    State(state): State<AppState>,
    Query(params): Query<FormsQueryParams>,
) -> Result<impl IntoResponse, AppError> {
    let filter = params.filter()?;
    let page = params.page()?;

    let (tasks, total) = state.store.list(&filter, page).await?;

    Ok(Json(DataResponse::new(FormsPage::new(tasks, total, page))))
}

/// `GET /forms/:task_id/`
pub async fn get_form(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let task = state
        .store
        .find_by_id(&task_id)
        .await?
        .ok_or_else(task_not_found)?;

    Ok(Json(DataResponse::new(TaskDetail::from(task))))
}

/// `POST /forms/:task_id/update/`. The path id wins; a body id, when given,
/// must agree with it.
pub async fn update_form(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    ValidatedJson(body): ValidatedJson<UpdateContentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let task_id = task_id.trim();

    if let Some(body_id) = body.task_id.as_deref().map(str::trim) {
        if !body_id.is_empty() && body_id != task_id {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "task_id in body does not match path"
            )));
        }
    }

    let content = body.content.unwrap_or_default();
    let affected = state.store.update_content(task_id, &content).await?;
    if affected == 0 {
        return Err(task_not_found());
    }

    tracing::info!(task_id = %task_id, content_len = content.len(), "Form content updated");

    Ok(Json(MessageResponse::new("Form content updated successfully")))
}

/// `DELETE /forms/:task_id/delete/`
pub async fn delete_form(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let task_id = task_id.trim();
    let affected = state.store.delete(task_id).await?;
    if affected == 0 {
        return Err(task_not_found());
    }

    remove_uploads(&state, task_id).await;
    tracing::info!(task_id = %task_id, "Form deleted");

    Ok(Json(MessageResponse::new("Form deleted successfully")))
}

/// `DELETE /forms/delete-batch/`
pub async fn delete_forms_batch(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<BatchDeleteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = state.store.delete_many(&body.task_ids).await?;

    for task_id in &body.task_ids {
        let task_id = task_id.trim();
        if !task_id.is_empty() {
            remove_uploads(&state, task_id).await;
        }
    }

    tracing::info!(
        requested = body.task_ids.len(),
        deleted = deleted,
        "Forms deleted in batch"
    );

    Ok(Json(BatchDeleteResponse::new(deleted)))
}

/// Best effort: the row is already gone.
async fn remove_uploads(state: &AppState, task_id: &str) {
    if task_id.contains(['/', '\\']) {
        return;
    }
    if let Err(e) = state.storage.delete_prefix(&task_upload_dir(task_id)).await {
        tracing::warn!(task_id = %task_id, error = %e, "Failed to remove uploaded files");
    }
}
