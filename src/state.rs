use std::sync::Arc;

use axum::extract::FromRef;

use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::extraction::{OpenAiReceiptParser, ReceiptParser, TextExtractor, TextractExtractor};
use crate::storage::{load_aws_config, S3Storage, StorageClient};
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
    pub ocr: Arc<dyn TextExtractor>,
    pub parser: Arc<dyn ReceiptParser>,
    pub cache: ResponseCache,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let db = crate::db::connect(&config.database_url).await?;

        let aws = load_aws_config(&config.storage).await;
        let storage = Arc::new(S3Storage::new(&aws, &config.storage)) as Arc<dyn StorageClient>;
        let ocr = Arc::new(TextractExtractor::new(&aws)) as Arc<dyn TextExtractor>;
        let parser = Arc::new(OpenAiReceiptParser::new(&config.llm)?) as Arc<dyn ReceiptParser>;
        let cache = ResponseCache::new(config.cache.max_entries);

        Ok(Self {
            db,
            config,
            storage,
            ocr,
            parser,
            cache,
        })
    }

    pub fn from_parts(
        db: PgPool,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
        ocr: Arc<dyn TextExtractor>,
        parser: Arc<dyn ReceiptParser>,
    ) -> Self {
        let cache = ResponseCache::new(config.cache.max_entries);
        Self {
            db,
            config,
            storage,
            ocr,
            parser,
            cache,
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}
