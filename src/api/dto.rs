/*
 * Responsibility
 * - / と /healthz の response DTO
 * - どちらも per-request で生成、可変フィールドなし
 */
use serde::Serialize;

/// Value of `HealthResponse::status` whenever the handler runs.
pub const HEALTH_OK: &str = "ok";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self { status: HEALTH_OK }
    }
}
