use crate::dtos::{
    DataResponse, StatusPage, StatusQueryParams, SubmissionForm, SubmissionResponse, UploadedFile,
};
use crate::models::generate_task_id;
use crate::services::storage::{contract_key, image_key, task_upload_dir};
use crate::startup::AppState;
use crate::workers::InterpretationJob;
use axum::{
    extract::{multipart::MultipartError, Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

/// `POST /interpretation/start/`
pub async fn start_interpretation(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_submission(&mut multipart).await?;
    let context = form.validate(&state.config.submission).map_err(|e| {
        tracing::info!(error = %e, "Rejected interpretation submission");
        e
    })?;

    let task_id = generate_task_id();
    tracing::info!(
        task_id = %task_id,
        task_name = %context.task_name,
        company = %context.company,
        scene = %context.scene,
        has_contract = form.contract.is_some(),
        image_count = form.images.len(),
        "Interpretation submission accepted"
    );

    let SubmissionForm {
        contract, images, ..
    } = form;

    let (contract_path, image_paths) = match store_uploads(&state, &task_id, contract, images).await
    {
        Ok(paths) => paths,
        Err(e) => {
            discard_submission(&state, &task_id, false).await;
            return Err(e);
        }
    };

    let recorded = match state.lifecycle.start(&task_id, &context).await {
        Ok(_) => true,
        Err(e) if state.config.submission.strict_persistence => {
            discard_submission(&state, &task_id, false).await;
            return Err(e);
        }
        Err(e) => {
            tracing::warn!(
                task_id = %task_id,
                error = %e,
                "Task record not created, continuing with submission"
            );
            false
        }
    };

    let job = InterpretationJob {
        task_id: task_id.clone(),
        context,
        contract_path,
        image_paths,
    };
    if let Err(e) = state.queue.enqueue(job) {
        discard_submission(&state, &task_id, recorded).await;
        return Err(e);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmissionResponse::started(task_id)),
    ))
}

/// `GET /interpretation/status/`
pub async fn query_status(
    State(state): State<AppState>,
    Query(params): Query<StatusQueryParams>,
) -> Result<impl IntoResponse, AppError> {
    let filter = params.filter()?;
    let page = params.page()?;

    let (tasks, total) = state.store.list(&filter, page).await?;

    tracing::debug!(total = total, page = page.page, "Task status queried");

    Ok(Json(DataResponse::new(StatusPage::new(tasks, total, page))))
}

/// Write the contract and images under the task's upload directory.
async fn store_uploads(
    state: &AppState,
    task_id: &str,
    contract: Option<UploadedFile>,
    images: Vec<UploadedFile>,
) -> Result<(Option<String>, Vec<String>), AppError> {
    let contract_path = match contract {
        Some(file) => {
            let key = contract_key(task_id);
            state.storage.upload(&key, file.data).await.map_err(|e| {
                tracing::error!(task_id = %task_id, key = %key, error = %e, "Failed to store contract");
                e
            })?;
            Some(key)
        }
        None => None,
    };

    let mut image_paths = Vec::with_capacity(images.len());
    for (i, file) in images.into_iter().enumerate() {
        let key = image_key(task_id, i + 1);
        state.storage.upload(&key, file.data).await.map_err(|e| {
            tracing::error!(task_id = %task_id, key = %key, error = %e, "Failed to store image");
            e
        })?;
        image_paths.push(key);
    }
    if !image_paths.is_empty() {
        tracing::info!(task_id = %task_id, count = image_paths.len(), "Stored image files");
    }

    Ok((contract_path, image_paths))
}

/// Remove the row and files of a submission rejected after its id was minted.
async fn discard_submission(state: &AppState, task_id: &str, row_written: bool) {
    if row_written {
        if let Err(e) = state.store.delete(task_id).await {
            tracing::error!(task_id = %task_id, error = %e, "Failed to remove rejected task record");
        }
    }
    if let Err(e) = state.storage.delete_prefix(&task_upload_dir(task_id)).await {
        tracing::warn!(task_id = %task_id, error = %e, "Failed to remove rejected uploads");
    }
    tracing::warn!(task_id = %task_id, "Submission rejected, task discarded");
}

async fn read_submission(multipart: &mut Multipart) -> Result<SubmissionForm, AppError> {
    let mut form = SubmissionForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "task_name" | "company" | "scene" => {
                let value = field.text().await.map_err(multipart_error)?;
                match name.as_str() {
                    "task_name" => form.task_name = Some(value),
                    "company" => form.company = Some(value),
                    _ => form.scene = Some(value),
                }
            }
            "pdf_file" | "png_files" | "png_files[]" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?.to_vec();
                // Browsers send an empty part for an untouched file input.
                if file_name.is_empty() && data.is_empty() {
                    continue;
                }
                let file = UploadedFile { file_name, data };
                if name == "pdf_file" {
                    form.contract = Some(file);
                } else {
                    form.images.push(file);
                }
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown multipart field");
            }
        }
    }

    Ok(form)
}

fn multipart_error(e: MultipartError) -> AppError {
    AppError::BadRequest(anyhow::anyhow!(
        "Failed to read multipart field: {}",
        e.body_text()
    ))
}
