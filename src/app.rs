use std::net::SocketAddr;

use axum::{middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::rate_limit::{self, RateLimiter};
use crate::state::AppState;
use crate::{auth, bills, uploads};

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn build_app(state: AppState) -> Router {
    let cfg = state.config.clone();

    // Auth and upload each get their own per-client budget.
    let auth_routes = auth::router().layer(middleware::from_fn_with_state(
        RateLimiter::new("auth", &cfg.rate_limit),
        rate_limit::enforce,
    ));
    let upload_routes = uploads::router(cfg.upload.max_file_size).layer(
        middleware::from_fn_with_state(
            RateLimiter::new("upload", &cfg.rate_limit),
            rate_limit::enforce,
        ),
    );

    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth_routes)
                .merge(upload_routes)
                .merge(bills::router()),
        )
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::auth::jwt::JwtKeys;
    use crate::cache::preview_url_key;
    use crate::state::testing::{fake_state, lazy_pool, state_with, test_config, FakeStorage};

    async fn body_json(res: axum::response::Response) -> Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn bearer_for(state: &AppState, user_id: Uuid) -> String {
        let keys = JwtKeys::from(&state.config.jwt);
        format!("Bearer {}", keys.sign_access(user_id).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = build_app(fake_state());
        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn bills_require_a_token() {
        let app = build_app(fake_state());
        let res = app
            .oneshot(Request::get("/api/bills").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["message"], "Token is missing");
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() {
        let state = fake_state();
        let keys = JwtKeys::from(&state.config.jwt);
        let refresh = keys.sign_refresh(Uuid::new_v4()).unwrap();
        let res = build_app(state)
            .oneshot(
                Request::get("/api/bills")
                    .header(header::AUTHORIZATION, format!("Bearer {}", refresh))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upload_without_token_is_rejected() {
        let app = build_app(fake_state());
        let res = app
            .oneshot(
                Request::post("/api/upload")
                    .header(header::CONTENT_TYPE, "multipart/form-data; boundary=X")
                    .body(Body::from("--X--\r\n"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    fn multipart(auth: &str, body: &'static str) -> Request<Body> {
        Request::post("/api/upload")
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=X")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn token_signed_with_another_secret_is_rejected() {
        let state = fake_state();
        let mut other = test_config("uploads-test").jwt;
        other.secret = "someone-else".into();
        let forged = JwtKeys::from(&other).sign_access(Uuid::new_v4()).unwrap();
        let res = build_app(state)
            .oneshot(multipart(&format!("Bearer {}", forged), "--X--\r\n"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["message"], "Invalid or expired token");
    }

    mod with_database {
        use sqlx::PgPool;

        use super::*;
        use crate::auth::repo_types::User;

        async fn app_and_user(db: PgPool) -> (Router, AppState, Uuid) {
            let user = User::create(&db, "alice", "alice@example.com", "hash").await.unwrap();
            let state = state_with(db, test_config("uploads-test"), Arc::new(FakeStorage::default()));
            (build_app(state.clone()), state, user.id)
        }

        #[sqlx::test]
        #[ignore = "requires a Postgres DATABASE_URL"]
        async fn token_for_unknown_user_is_rejected(db: PgPool) {
            let (app, state, _) = app_and_user(db).await;
            let res = app
                .oneshot(
                    Request::get("/api/bills")
                        .header(header::AUTHORIZATION, bearer_for(&state, Uuid::new_v4()))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(res).await["message"], "Invalid token - User not found");
        }

        #[sqlx::test]
        #[ignore = "requires a Postgres DATABASE_URL"]
        async fn deactivated_user_loses_access_before_any_upload_work(db: PgPool) {
            let (app, state, user_id) = app_and_user(db.clone()).await;
            sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
                .bind(user_id)
                .execute(&db)
                .await
                .unwrap();

            let body = concat!(
                "--X\r\n",
                "Content-Disposition: form-data; name=\"file\"; filename=\"r.png\"\r\n",
                "Content-Type: image/png\r\n\r\n",
                "png\r\n",
                "--X--\r\n"
            );
            let res = app
                .oneshot(multipart(&bearer_for(&state, user_id), body))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
            let bills: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bills")
                .fetch_one(&db)
                .await
                .unwrap();
            assert_eq!(bills, 0);
        }

        #[sqlx::test]
        #[ignore = "requires a Postgres DATABASE_URL"]
        async fn upload_without_file_part_is_a_bad_request(db: PgPool) {
            let (app, state, user_id) = app_and_user(db).await;
            let body = "--X\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--X--\r\n";
            let res = app
                .oneshot(multipart(&bearer_for(&state, user_id), body))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(res).await["message"], "No file part");
        }

        #[sqlx::test]
        #[ignore = "requires a Postgres DATABASE_URL"]
        async fn upload_with_disallowed_extension_is_rejected(db: PgPool) {
            let (app, state, user_id) = app_and_user(db).await;
            let body = concat!(
                "--X\r\n",
                "Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n",
                "Content-Type: text/plain\r\n\r\n",
                "hello\r\n",
                "--X--\r\n"
            );
            let res = app
                .oneshot(multipart(&bearer_for(&state, user_id), body))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(res).await["message"], "File type not allowed");
        }

        #[sqlx::test]
        #[ignore = "requires a Postgres DATABASE_URL"]
        async fn preview_url_is_served_from_cache(db: PgPool) {
            let (app, state, user_id) = app_and_user(db).await;
            let bill_id = Uuid::new_v4();
            let cached = json!({ "signed_url": "https://cached.local/x", "expires_in_seconds": 600 });
            state
                .cache
                .put(
                    preview_url_key(user_id, bill_id),
                    cached.clone(),
                    Duration::from_secs(300),
                )
                .await;

            // No such bill exists, so only the cache can answer 200.
            let res = app
                .oneshot(
                    Request::get(format!("/api/bill/{}/preview-url", bill_id))
                        .header(header::AUTHORIZATION, bearer_for(&state, user_id))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(body_json(res).await, cached);
        }
    }

    #[tokio::test]
    async fn auth_routes_are_rate_limited() {
        let mut cfg = test_config("uploads-test");
        cfg.rate_limit.requests_per_window = 1;
        let app = build_app(state_with(lazy_pool(), cfg, Arc::new(FakeStorage::default())));

        let login = || {
            Request::post("/api/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"username":"","password":""}"#))
                .unwrap()
        };
        let first = app.clone().oneshot(login()).await.unwrap();
        assert_eq!(first.status(), StatusCode::BAD_REQUEST);

        let second = app.oneshot(login()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
