use sqlx::{FromRow, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::quota::UploadUsage;

/// Audit row written after a bill is ingested.
#[derive(Debug, Clone, FromRow)]
pub struct Upload {
    pub id: Uuid,
    pub user_id: Uuid,
    pub filename: String,
    pub upload_date: OffsetDateTime,
    pub file_size: i64,
    pub status: String,
}

pub const STATUS_COMPLETED: &str = "completed";

pub async fn record(
    db: &PgPool,
    user_id: Uuid,
    filename: &str,
    file_size: i64,
) -> Result<Upload, sqlx::Error> {
    sqlx::query_as::<_, Upload>(
        r#"
        INSERT INTO uploads (user_id, filename, file_size, status)
        VALUES ($1, $2, $3, $4)
        RETURNING id, user_id, filename, upload_date, file_size, status
        "#,
    )
    .bind(user_id)
    .bind(filename)
    .bind(file_size)
    .bind(STATUS_COMPLETED)
    .fetch_one(db)
    .await
}

/// Lifetime count plus count and byte total over the trailing 24 hours.
pub async fn usage(db: &PgPool, user_id: Uuid) -> Result<UploadUsage, sqlx::Error> {
    let since = OffsetDateTime::now_utc() - Duration::hours(24);
    let (total_uploads, uploads_last_day, bytes_last_day) = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"
        SELECT
            COUNT(*),
            COUNT(*) FILTER (WHERE upload_date >= $2),
            COALESCE(SUM(file_size) FILTER (WHERE upload_date >= $2), 0)::BIGINT
        FROM uploads
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_one(db)
    .await?;

    Ok(UploadUsage {
        total_uploads,
        uploads_last_day,
        bytes_last_day,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::User;

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn usage_counts_recorded_uploads(db: PgPool) {
        let user = User::create(&db, "alice", "alice@example.com", "hash").await.unwrap();

        let empty = usage(&db, user.id).await.unwrap();
        assert_eq!(empty, UploadUsage::default());

        record(&db, user.id, "a.png", 1_000).await.unwrap();
        record(&db, user.id, "b.pdf", 2_500).await.unwrap();

        let used = usage(&db, user.id).await.unwrap();
        assert_eq!(used.total_uploads, 2);
        assert_eq!(used.uploads_last_day, 2);
        assert_eq!(used.bytes_last_day, 3_500);
    }
}
