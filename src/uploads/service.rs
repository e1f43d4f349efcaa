use std::path::Path;

use bytes::Bytes;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    quota::QuotaPolicy,
    repo,
    staging::{extension, secure_filename, StagedFile},
};
use crate::{
    bills::{
        dto::BillView,
        repo::{self as bills_repo, InsertBillError},
        repo_types::NewBill,
    },
    cache::bills_key,
    error::AppError,
    state::AppState,
    storage::bill_object_key,
};

/// A file part pulled out of the multipart body.
pub struct IncomingFile {
    pub filename: String,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub filename: String,
    pub bill: BillView,
}

fn megabytes(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}

/// Checks name, type and size, returning the sanitized filename and its
/// extension.
pub(crate) fn validate_file(
    state: &AppState,
    file: &IncomingFile,
) -> Result<(String, String), AppError> {
    let cfg = &state.config.upload;

    if file.filename.trim().is_empty() {
        return Err(AppError::Validation("No file selected".into()));
    }
    let filename = secure_filename(&file.filename);
    let ext = extension(&filename)
        .filter(|e| cfg.allowed_extensions.iter().any(|a| a == e))
        .ok_or_else(|| AppError::Validation("File type not allowed".into()))?;

    if file.body.is_empty() {
        return Err(AppError::Validation("File is empty".into()));
    }
    if file.body.len() as u64 > cfg.max_file_size {
        return Err(AppError::Validation(format!(
            "File size exceeds maximum limit of {}MB",
            megabytes(cfg.max_file_size)
        )));
    }
    Ok((filename, ext))
}

/// Stages the upload on disk, OCRs it and turns the text into a bill.
/// The staged copy is gone by the time this returns, whatever the outcome.
pub(crate) async fn extract_receipt(
    state: &AppState,
    user_id: Uuid,
    filename: &str,
    body: Bytes,
) -> Result<NewBill, AppError> {
    let staged = StagedFile::write(Path::new(&state.config.upload.folder), filename, body)
        .await
        .map_err(AppError::processing)?;
    info!(%user_id, %filename, "file saved temporarily");

    let text = state
        .ocr
        .extract_text(staged.path())
        .await
        .map_err(AppError::processing)?;
    if text.is_empty() {
        return Err(AppError::processing(anyhow::anyhow!(
            "no text recognized in document"
        )));
    }

    let extracted = state
        .parser
        .parse_receipt(&text)
        .await
        .map_err(AppError::processing)?;
    extracted.into_new_bill().map_err(AppError::processing)
}

/// Runs the whole ingestion pipeline for one receipt.
///
/// Nothing is written before the quota check passes. The bill is committed
/// before the original goes to blob storage; if that upload fails the bill
/// stays and the error is reported as is.
#[instrument(skip(state, file), fields(filename = %file.filename, size = file.body.len()))]
pub async fn process_upload(
    state: &AppState,
    user_id: Uuid,
    file: IncomingFile,
) -> Result<UploadOutcome, AppError> {
    let (filename, ext) = validate_file(state, &file).map_err(|e| {
        info!(%user_id, error = %e, "upload rejected");
        e
    })?;

    let usage = repo::usage(&state.db, user_id).await?;
    QuotaPolicy::from(&state.config.upload)
        .check(&usage)
        .map_err(|e| {
            info!(%user_id, error = %e, "upload quota exceeded");
            e
        })?;

    let file_size = file.body.len() as i64;
    let new_bill = extract_receipt(state, user_id, &filename, file.body.clone()).await?;

    let (bill, items) = match bills_repo::insert_with_items(&state.db, user_id, &new_bill).await {
        Ok(v) => v,
        Err(InsertBillError::Duplicate) => {
            warn!(%user_id, merchant = %new_bill.merchant_name, date = %new_bill.date, "duplicate bill detected");
            return Err(AppError::DuplicateBill);
        }
        Err(InsertBillError::Database(e)) => return Err(AppError::Database(e)),
    };
    info!(%user_id, bill_id = %bill.id, items = items.len(), "extracted data saved");

    let key = bill_object_key(user_id, bill.id, &ext);
    if let Err(e) = state
        .storage
        .put_object(&key, file.body, &file.content_type)
        .await
    {
        error!(%user_id, bill_id = %bill.id, error = %e, "storage upload failed");
        return Err(AppError::Storage("Failed to upload image to storage.".into()));
    }
    bills_repo::set_s3_key(&state.db, bill.id, &key).await?;

    state.cache.invalidate(&bills_key(user_id)).await;

    repo::record(&state.db, user_id, &filename, file_size).await?;
    info!(%user_id, bill_id = %bill.id, %filename, "upload recorded");

    let mut bill = bill;
    bill.s3_key = Some(key);
    Ok(UploadOutcome {
        filename,
        bill: BillView::new(bill, items),
    })
}
