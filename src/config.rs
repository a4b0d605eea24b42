/*
 * Responsibility
 * - 環境変数からの設定読み込み (PORT, HOST, APP_ENV, GREETING, REQUEST_TIMEOUT_SECONDS)
 * - 設定値のバリデーション (不正なら起動失敗)
 * - listening port の唯一の定義 (DEFAULT_PORT)
 */
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// The port the service binds to unless `PORT` overrides it.
///
/// The Dockerfile and the Kubernetes manifests must declare the same value;
/// `deploy::check` enforces it.
pub const DEFAULT_PORT: u16 = 8080;

pub const DEFAULT_GREETING: &str = "Hello from SRE Test!";

const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: Option<&str>) -> Self {
        match raw.unwrap_or("development").to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    pub greeting: String,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // A bad PORT must not fall back to the default: the manifests would
        // keep probing DEFAULT_PORT while we listen somewhere else.
        let port = match lookup("PORT") {
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(0) | Err(_) => return Err(ConfigError::Invalid("PORT")),
                Ok(port) => port,
            },
            None => DEFAULT_PORT,
        };

        let host: IpAddr = match lookup("HOST") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid("HOST"))?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let app_env = AppEnv::parse(lookup("APP_ENV").as_deref());

        let greeting = lookup("GREETING")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_GREETING.to_string());

        let request_timeout_seconds = match lookup("REQUEST_TIMEOUT_SECONDS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) | Err(_) => return Err(ConfigError::Invalid("REQUEST_TIMEOUT_SECONDS")),
                Ok(secs) => secs,
            },
            None => DEFAULT_REQUEST_TIMEOUT_SECONDS,
        };

        Ok(Self {
            addr: SocketAddr::new(host, port),
            app_env,
            greeting,
            request_timeout: Duration::from_secs(request_timeout_seconds),
        })
    }
}
