/*
 * Responsibility
 * - Config読み込み → AppState 生成 → Router 組み立て
 * - Middleware の適用 (request-id / trace / timeout)
 * - axum::serve() で起動、SIGTERM で graceful shutdown
 */
use std::{panic, process};

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{api, config::Config, middleware, shutdown, state::AppState};

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,hello_sre=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        tracing::error!(?info, "panic");

        // Development: crash the whole process so the liveness probe notices.
        // Production: default behavior, the panicking connection is dropped.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env().context("failed to load configuration")?;
    init_panic_hook(!config.app_env.is_production());

    tracing::info!(
        "starting hello-sre in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    serve(listener, &config).await
}

/// Serve on an already bound listener until a shutdown signal arrives.
pub async fn serve(listener: TcpListener, config: &Config) -> Result<()> {
    let app = build_router(AppState::from_config(config), config);

    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

pub fn build_router(state: AppState, config: &Config) -> Router {
    let router = api::routes().with_state(state);
    middleware::http::apply(router, config.request_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, Bytes};
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    fn test_config() -> Config {
        Config::from_lookup(|_| None).unwrap()
    }

    fn app() -> Router {
        let config = test_config();
        build_router(AppState::from_config(&config), &config)
    }

    async fn get(app: Router, path: &str) -> (StatusCode, Bytes) {
        let response = app
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    #[tokio::test]
    async fn root_returns_greeting_json() {
        let (status, body) = get(app(), "/").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"message": "Hello from SRE Test!"}));
    }

    #[tokio::test]
    async fn healthz_returns_ok_json() {
        let (status, body) = get(app(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn repeated_calls_return_identical_payloads() {
        let app = app();
        let (_, first_root) = get(app.clone(), "/").await;
        let (_, first_health) = get(app.clone(), "/healthz").await;
        for _ in 0..25 {
            assert_eq!(get(app.clone(), "/").await.1, first_root);
            let (status, body) = get(app.clone(), "/healthz").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, first_health);
        }
    }

    #[tokio::test]
    async fn unknown_path_is_json_404() {
        let (status, body) = get(app(), "/health").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn post_to_healthz_is_method_not_allowed() {
        let response = app()
            .oneshot(Request::post("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    async fn raw_get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn serves_probes_over_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = test_config();
        let app = build_router(AppState::from_config(&config), &config);
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let health = raw_get(addr, "/healthz").await;
        assert!(health.starts_with("HTTP/1.1 200 OK"), "{health}");
        assert!(health.ends_with(r#"{"status":"ok"}"#), "{health}");

        let started = Instant::now();
        let root = raw_get(addr, "/").await;
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(root.starts_with("HTTP/1.1 200 OK"), "{root}");
        assert!(root.contains(r#"{"message":"Hello from SRE Test!"}"#), "{root}");

        // Once the process stops listening, probes see a connection failure.
        server.abort();
        let _ = server.await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
