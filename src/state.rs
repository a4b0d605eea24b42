/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 * - 不変 (immutable) で Clone 前提 (内部は Arc で cheap)
 */
use std::sync::Arc;

use crate::config::{Config, DEFAULT_GREETING};

#[derive(Clone, Debug)]
pub struct AppState {
    pub greeting: Arc<str>,
}

impl AppState {
    pub fn new(greeting: impl Into<Arc<str>>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.greeting.as_str())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DEFAULT_GREETING)
    }
}
