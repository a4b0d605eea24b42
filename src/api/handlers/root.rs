/*
 * Responsibility
 * - GET / (greeting)
 * - sleep / 外部呼び出しを入れない: latency はリクエスト処理のオーバーヘッドのみ
 */
use axum::{Json, extract::State};

use crate::{api::dto::RootResponse, state::AppState};

pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: state.greeting.to_string(),
    })
}
