use crate::AppState;
use crate::api::error::AppError;
use crate::utils::validation::{UploadSummary, check_upload_count};
use axum::extract::{Multipart, State};
use utoipa::ToSchema;

/// Multipart form accepted by `/api/validate`
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ValidateForm {
    #[schema(value_type = Vec<String>, format = Binary)]
    files: Vec<Vec<u8>>,
}

/// Reports what a merge request would receive without spooling or merging it.
#[utoipa::path(
    post,
    path = "/api/validate",
    request_body(content = ValidateForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Plaintext size summary", body = String),
        (status = 400, description = "No files uploaded")
    ),
    tag = "pdf"
)]
pub async fn validate_uploads(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<String, AppError> {
    let mut summary = UploadSummary::new();

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some("files") {
            while field.chunk().await?.is_some() {}
            continue;
        }

        let name = field.file_name().unwrap_or("unnamed").to_string();
        let mut size = 0u64;
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len() as u64;
        }
        summary.record(name, size);
    }

    check_upload_count(summary.file_count())?;

    Ok(summary.render(state.config.size_warning_threshold))
}
