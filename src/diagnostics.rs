//! Optional diagnostics HTTP endpoint.
//!
//! Bound only when `diagnostics.listen_addr` is configured. Handlers read a
//! snapshot of the configuration and never touch walker state. Besides the
//! health routes it serves the process profiles under `/debug/pprof/`.

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use pprof::protos::Message;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::health::HealthCheck;

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub name: &'static str,
    pub version: &'static str,
}

pub fn router(config: Arc<Config>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/debug/health", get(health))
        .route("/debug/version", get(version))
        .route("/debug/pprof/", get(pprof_index))
        .route("/debug/pprof/cmdline", get(cmdline))
        .route("/debug/pprof/profile", get(profile))
        .with_state(config)
}

/// Slow clients are dropped if the request head takes longer than this
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default CPU profile length when `seconds` is absent or unusable
const DEFAULT_PROFILE_SECONDS: u64 = 30;
const MAX_PROFILE_SECONDS: u64 = 300;

/// Bind `addr` and serve until the process exits
pub async fn serve(addr: &str, config: Arc<Config>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind diagnostics endpoint on {}", addr))?;
    serve_on(listener, config).await
}

pub async fn serve_on(listener: TcpListener, config: Arc<Config>) -> Result<()> {
    serve_with_timeout(listener, config, HEADER_READ_TIMEOUT).await
}

async fn serve_with_timeout(
    listener: TcpListener,
    config: Arc<Config>,
    header_timeout: Duration,
) -> Result<()> {
    let local = listener
        .local_addr()
        .context("Failed to read diagnostics listener address")?;
    info!("Diagnostics endpoint listening on http://{}", local);

    let app = router(config);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Diagnostics endpoint failed to accept: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let connection = http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(header_timeout)
                .serve_connection(TokioIo::new(stream), service);
            if let Err(e) = connection.await {
                debug!("Diagnostics connection from {} closed: {}", peer, e);
            }
        });
    }
}

/// Spawn the endpoint as its own task; failures are logged, never fatal
pub fn spawn(addr: String, config: Arc<Config>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = serve(&addr, config).await {
            error!("Diagnostics endpoint error: {:#}", e);
        }
    })
}

async fn healthz() -> &'static str {
    "ok"
}

/// GET /debug/health - run the preflight checks on demand
async fn health(
    State(config): State<Arc<Config>>,
) -> Result<Json<HealthCheck>, (StatusCode, String)> {
    tokio::task::spawn_blocking(move || HealthCheck::run(&config))
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn pprof_index() -> &'static str {
    "/debug/pprof/\n\n\
     cmdline: the command line of the running process\n\
     profile: CPU profile in pprof format, sampled for ?seconds=N (default 30)\n"
}

/// GET /debug/pprof/cmdline - arguments separated by NUL bytes
async fn cmdline() -> impl IntoResponse {
    let args: Vec<String> = std::env::args().collect();
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        args.join("\0"),
    )
}

/// GET /debug/pprof/profile?seconds=N - sample the process and return protobuf
async fn profile(
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let seconds = profile_seconds(params.get("seconds").map(String::as_str));
    if seconds > MAX_PROFILE_SECONDS {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("profile duration exceeds {} seconds", MAX_PROFILE_SECONDS),
        ));
    }

    info!("Collecting {}s CPU profile", seconds);
    let body = tokio::task::spawn_blocking(move || cpu_profile(Duration::from_secs(seconds)))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"profile\""),
        ],
        body,
    ))
}

fn profile_seconds(raw: Option<&str>) -> u64 {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|&seconds| seconds > 0)
        .unwrap_or(DEFAULT_PROFILE_SECONDS)
}

fn cpu_profile(duration: Duration) -> Result<Vec<u8>> {
    let guard = pprof::ProfilerGuardBuilder::default()
        .frequency(100)
        .build()
        .context("Could not enable CPU profiling")?;

    std::thread::sleep(duration);

    let profile = guard
        .report()
        .build()
        .context("Failed to build CPU profile report")?
        .pprof()
        .context("Failed to convert CPU profile")?;

    let mut body = Vec::new();
    profile
        .encode(&mut body)
        .context("Failed to encode CPU profile")?;
    Ok(body)
}
