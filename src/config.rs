use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Limits applied to `POST /api/upload`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub folder: String,
    pub allowed_extensions: Vec<String>,
    pub max_file_size: u64,
    pub max_total_uploads: i64,
    pub max_uploads_per_day: i64,
    pub max_total_size_per_day: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Custom S3 endpoint (MinIO, R2...). `None` means AWS proper.
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub preview_url_expiry_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub bills_ttl_secs: u64,
    pub max_entries: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_window: u64,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: env_or("JWT_ISSUER", "spendlytic"),
            audience: env_or("JWT_AUDIENCE", "spendlytic-users"),
            ttl_minutes: env_parse("JWT_ACCESS_TOKEN_EXPIRES", 30),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TOKEN_EXPIRES", 60 * 24 * 14),
        };
        let upload = UploadConfig {
            folder: env_or("UPLOAD_FOLDER", "uploads"),
            allowed_extensions: parse_extensions(&env_or("ALLOWED_EXTENSIONS", "pdf,png,jpg,jpeg")),
            max_file_size: env_parse("MAX_FILE_SIZE", 10 * 1024 * 1024),
            max_total_uploads: env_parse("MAX_TOTAL_UPLOADS", 100),
            max_uploads_per_day: env_parse("MAX_UPLOADS_PER_DAY", 10),
            max_total_size_per_day: env_parse("MAX_TOTAL_SIZE_PER_DAY", 50 * 1024 * 1024),
        };
        let storage = StorageConfig {
            endpoint: std::env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            bucket: env_or("S3_BUCKET_NAME", "spendlytic"),
            region: env_or("AWS_REGION", "us-east-1"),
            access_key: std::env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
            preview_url_expiry_secs: env_parse("PREVIEW_URL_EXPIRY_SECS", 600),
        };
        let llm = LlmConfig {
            api_key: std::env::var("OPENAI_API_KEY")?,
            model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            timeout_secs: env_parse("OPENAI_TIMEOUT_SECS", 60),
        };
        let cache = CacheConfig {
            bills_ttl_secs: env_parse("BILLS_CACHE_TTL_SECS", 60),
            max_entries: env_parse("CACHE_MAX_ENTRIES", 10_000),
        };
        let rate_limit = RateLimitConfig {
            requests_per_window: env_parse("RATE_LIMIT_PER_DAY", 10),
            window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", 24 * 60 * 60),
        };
        Ok(Self {
            database_url,
            jwt,
            upload,
            storage,
            llm,
            cache,
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extensions_normalizes_entries() {
        assert_eq!(
            parse_extensions(" PDF, .png,jpg,, JPEG "),
            vec!["pdf", "png", "jpg", "jpeg"]
        );
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        assert_eq!(env_parse::<u64>("SPENDLYTIC_TEST_UNSET_VARIABLE", 42), 42);
    }
}
