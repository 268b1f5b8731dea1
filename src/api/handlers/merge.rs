use crate::AppState;
use crate::api::error::AppError;
use crate::models::{MergeRequest, SpooledFile, UploadPart};
use crate::services::cleanup::CleanupGuard;
use crate::services::orchestrator::MergeOrchestrator;
use crate::services::streaming::{StreamOptions, spawn_merge};
use crate::utils::validation::{check_upload_count, check_upload_name};
use axum::{
    extract::{Multipart, State},
    response::Response,
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

/// Multipart form accepted by `/api/merge`
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct MergeForm {
    /// PDF documents; page order in the output follows submission order
    #[schema(value_type = Vec<String>, format = Binary)]
    files: Vec<Vec<u8>>,
    /// Download name, `.pdf` is appended when missing (default `merged_output.pdf`)
    filename: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/merge",
    request_body(content = MergeForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Merged PDF streamed as an attachment"),
        (status = 400, description = "No files, or a file without a .pdf extension"),
        (status = 413, description = "Upload exceeds the configured size limit"),
        (status = 500, description = "Spooling or merge failure")
    ),
    tag = "pdf"
)]
pub async fn merge_pdfs(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut guard = CleanupGuard::new();
    let mut spooled: Vec<SpooledFile> = Vec::new();
    let mut requested_name: Option<String> = None;

    let collected: Result<(), AppError> = async {
        while let Some(mut field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();

            if name == "files" {
                // Checked before a single byte of this part reaches disk
                let filename = check_upload_name(field.file_name())?.to_string();

                let body_with_io_error = field.map_err(std::io::Error::other);
                let reader = StreamReader::new(body_with_io_error);

                let part = UploadPart::new(filename, spooled.len(), reader);
                let file = state.spool.spool(part, &mut guard).await?;
                spooled.push(file);
            } else if name == "filename" {
                requested_name = Some(field.text().await?);
            } else {
                while field.chunk().await?.is_some() {}
            }
        }

        check_upload_count(spooled.len())?;
        Ok(())
    }
    .await;

    if let Err(e) = collected {
        // Consume the remaining multipart stream to avoid a TCP reset in the browser
        tracing::warn!("Merge upload rejected: {}. Consuming remaining stream...", e);
        while let Ok(Some(mut field)) = multipart.next_field().await {
            while let Ok(Some(_)) = field.chunk().await {}
        }
        let report = guard.release();
        tracing::debug!(removed = report.removed, failed = report.failed, "Released spooled files");
        return Err(e);
    }

    let request = MergeRequest::new(spooled, requested_name.as_deref());
    tracing::info!(
        "🧩 Merging {} files ({} bytes spooled) into '{}'",
        request.files.len(),
        request.total_size(),
        request.output_name
    );

    let options = StreamOptions {
        chunk_size: state.config.stream_chunk_size,
        buffer_chunks: state.config.stream_buffer_chunks,
    };
    let orchestrator = MergeOrchestrator::new(&state.config);

    spawn_merge(orchestrator, request, guard, options)
        .into_response()
        .await
}
