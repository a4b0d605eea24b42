/*
 * Responsibility
 * - URL 構造の定義 (/ と /healthz のみ)
 * - 未定義パスは AppError::NotFound (JSON) で返す
 */
use axum::{Router, http::Uri, routing::get};

use crate::{
    api::handlers::{health::healthz, root::root},
    error::AppError,
    state::AppState,
};

pub const HEALTH_PATH: &str = "/healthz";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route(HEALTH_PATH, get(healthz))
        .fallback(not_found)
}

async fn not_found(uri: Uri) -> AppError {
    AppError::not_found(uri.path())
}
