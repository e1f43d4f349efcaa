pub mod handlers;
pub mod quota;
pub mod repo;
pub mod service;
pub mod staging;

use crate::state::AppState;
use axum::Router;

pub fn router(max_file_size: u64) -> Router<AppState> {
    handlers::upload_routes(max_file_size)
}
