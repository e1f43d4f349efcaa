//! In-process response cache with per-entry TTL.
//!
//! Handlers wrap their body in [`ResponseCache::read_through`]; only successful
//! responses are stored, and writers drop affected keys with
//! [`ResponseCache::invalidate`].

use std::future::Future;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use axum::Json;
use moka::{future::Cache, Expiry};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone)]
struct CachedBody {
    body: Value,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedBody> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &CachedBody, _now: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Clone)]
pub struct ResponseCache {
    inner: Cache<String, CachedBody>,
    /// Bumped on every invalidation. A miss only stores its body if no
    /// invalidation happened while its handler ran.
    generation: Arc<AtomicU64>,
}

pub fn bills_key(user_id: Uuid) -> String {
    format!("user_bills_{}", user_id)
}

pub fn preview_url_key(user_id: Uuid, bill_id: Uuid) -> String {
    format!("signed_url_{}_{}", user_id, bill_id)
}

impl ResponseCache {
    pub fn new(max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            inner,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key).await.map(|c| c.body)
    }

    pub async fn put(&self, key: String, body: Value, ttl: Duration) {
        self.inner.insert(key, CachedBody { body, ttl }).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate(key).await;
        debug!(%key, "cache invalidated");
    }

    /// Returns the cached body for `key`, or runs `handler` and caches its
    /// body when it succeeds.
    pub async fn read_through<T, F, Fut>(
        &self,
        key: String,
        ttl: Duration,
        handler: F,
    ) -> Result<Json<Value>, AppError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if let Some(hit) = self.get(&key).await {
            info!(%key, "cache hit");
            return Ok(Json(hit));
        }
        info!(%key, "cache miss");

        let started = self.generation.load(Ordering::SeqCst);
        let fresh = handler().await?;
        let body = serde_json::to_value(fresh).map_err(anyhow::Error::from)?;
        if self.generation.load(Ordering::SeqCst) == started {
            self.put(key.clone(), body.clone(), ttl).await;
            debug!(%key, ttl_secs = ttl.as_secs(), "cache set");
        } else {
            debug!(%key, "invalidated while loading, not cached");
        }
        Ok(Json(body))
    }
}
