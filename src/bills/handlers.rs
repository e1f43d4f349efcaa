use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{BillView, BillsResponse, ItemView, ItemsResponse, MessageResponse, PreviewUrlResponse},
    repo,
};
use crate::{
    auth::AuthUser,
    cache::{bills_key, preview_url_key},
    error::AppError,
    state::AppState,
};

pub fn bills_routes() -> Router<AppState> {
    Router::new()
        .route("/bills", get(list_bills))
        .route("/bills/:id", axum::routing::delete(delete_bill))
        .route("/bills/:id/items", get(list_bill_items))
        .route("/bill/:id/preview-url", get(preview_url))
}

fn bill_not_found() -> AppError {
    AppError::NotFound("Bill not found".into())
}

pub(crate) async fn load_bills(state: &AppState, user_id: Uuid) -> Result<BillsResponse, AppError> {
    let bills = repo::list_by_user(&state.db, user_id).await?;
    let ids: Vec<Uuid> = bills.iter().map(|b| b.id).collect();
    let mut items = repo::items_for_bills(&state.db, &ids).await?;

    let bills = bills
        .into_iter()
        .map(|b| {
            let its = items.remove(&b.id).unwrap_or_default();
            BillView::new(b, its)
        })
        .collect();
    Ok(BillsResponse { bills })
}

#[instrument(skip(state))]
pub async fn list_bills(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, AppError> {
    let ttl = Duration::from_secs(state.config.cache.bills_ttl_secs);
    let st = &state;
    state
        .cache
        .read_through(bills_key(user_id), ttl, || async move {
            let res = load_bills(st, user_id).await?;
            info!(%user_id, count = res.bills.len(), "fetched bills");
            Ok::<_, AppError>(res)
        })
        .await
}

#[instrument(skip(state))]
pub async fn list_bill_items(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(bill_id): Path<Uuid>,
) -> Result<Json<ItemsResponse>, AppError> {
    let bill = repo::find_owned(&state.db, user_id, bill_id)
        .await?
        .ok_or_else(|| {
            info!(%user_id, %bill_id, "bill not found or not owned");
            bill_not_found()
        })?;

    let items = repo::items_for_bill(&state.db, bill.id).await?;
    Ok(Json(ItemsResponse {
        items: items.into_iter().map(ItemView::from).collect(),
    }))
}

/// Deletes the bill and its items. The stored object is removed on a best
/// effort basis; a storage failure does not resurrect the bill.
#[instrument(skip(state))]
pub async fn delete_bill(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(bill_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    let bill = repo::delete_owned(&state.db, user_id, bill_id)
        .await?
        .ok_or_else(bill_not_found)?;

    if let Some(key) = &bill.s3_key {
        if let Err(e) = state.storage.delete_object(key).await {
            warn!(error = %e, %bill_id, %key, "stored object not deleted");
        }
    }

    state.cache.invalidate(&bills_key(user_id)).await;
    state.cache.invalidate(&preview_url_key(user_id, bill_id)).await;

    info!(%user_id, %bill_id, "bill deleted");
    Ok(Json(MessageResponse {
        message: "Bill deleted".into(),
    }))
}

#[instrument(skip(state))]
pub async fn preview_url(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(bill_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let expiry = state.config.storage.preview_url_expiry_secs;
    // Cached URLs must stay usable for a while after being served.
    let ttl = Duration::from_secs(expiry / 2);
    let st = &state;

    state
        .cache
        .read_through(preview_url_key(user_id, bill_id), ttl, || async move {
            let bill = repo::find_owned(&st.db, user_id, bill_id)
                .await?
                .ok_or_else(bill_not_found)?;
            let key = bill
                .s3_key
                .ok_or_else(|| AppError::NotFound("No image available for this bill".into()))?;

            let signed_url = st
                .storage
                .presign_get(&key, expiry)
                .await
                .context("generate signed url")?;
            Ok::<_, AppError>(PreviewUrlResponse {
                signed_url,
                expires_in_seconds: expiry,
            })
        })
        .await
}
