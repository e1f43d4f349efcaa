use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{info, instrument};

use super::service::{process_upload, IncomingFile};
use crate::{auth::AuthUser, bills::dto::BillView, error::AppError, state::AppState};

/// Room for multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    pub filename: String,
    pub data: BillView,
}

pub fn upload_routes(max_file_size: u64) -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_file))
        .layer(DefaultBodyLimit::max(max_file_size as usize + MULTIPART_OVERHEAD))
}

async fn read_file_part(mp: &mut Multipart) -> Result<IncomingFile, AppError> {
    while let Some(field) = mp.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = field.bytes().await.map_err(multipart_error)?;
        return Ok(IncomingFile {
            filename,
            content_type,
            body,
        });
    }
    Err(AppError::Validation("No file part".into()))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("File size exceeds maximum limit".into())
    } else {
        AppError::Validation(format!("Malformed multipart body: {}", e.body_text()))
    }
}

/// POST /api/upload (multipart, field `file`)
#[instrument(skip(state, mp))]
pub async fn upload_file(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let file = read_file_part(&mut mp).await?;
    let outcome = process_upload(&state, user_id, file).await?;

    info!(%user_id, bill_id = %outcome.bill.id, "upload processed");
    Ok(Json(UploadResponse {
        message: "File uploaded and processed successfully",
        filename: outcome.filename,
        data: outcome.bill,
    }))
}
