/*
 * Responsibility
 * - GET /healthz (readiness / liveness probe 用)
 * - 依存先チェックなし: handler が実行できる = healthy
 * - 失敗は process の死としてのみ観測される (connection failure / timeout)
 */
use axum::{Json, http::StatusCode};

use crate::api::dto::HealthResponse;

pub async fn healthz() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse::ok()))
}
