mod api;
mod auth;
mod config;
mod cors;
mod db;
mod error;
mod gateway;
mod generation;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use liqua_common::protocol::HEALTH_PATH;
use liqua_llm::{build_generator, GeneratorSettings};

use crate::{
    api::AppState,
    auth::jwt::JwtAccessTokenService,
    config::ServerConfig,
    db::Database,
    error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope},
    generation::Generations,
};

const MAX_REQUEST_BODY_BYTES: usize = 4 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .init();

    if config.is_dev_jwt_secret() {
        warn!("LIQUA_JWT_SECRET is unset; using the development secret");
    }

    let jwt = Arc::new(JwtAccessTokenService::new(&config.jwt_secret).context("invalid LIQUA_JWT_SECRET")?);
    let db = Database::open(&config.database_path)?;
    let generator = config
        .ollama_url
        .as_ref()
        .map(|base_url| build_generator(&GeneratorSettings::Ollama { base_url: base_url.clone() }))
        .transpose()
        .context("failed to configure server-side generation")?;
    let generations = Arc::new(Generations::new(db.clone(), generator, config.timestamp_skew_ms));

    let state = AppState {
        db,
        jwt,
        generations: Arc::clone(&generations),
        allow_guests: config.allow_guests,
        skew_ms: config.timestamp_skew_ms,
    };
    let app = build_router(state, config.cors_origins.as_deref());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        database = %config.database_path.display(),
        allow_guests = config.allow_guests,
        server_generation = generations.is_enabled(),
        "starting liqua server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited unexpectedly")
}

fn build_router(state: AppState, cors_origins: Option<&str>) -> Router {
    apply_middleware(Router::new().route(HEALTH_PATH, get(healthz)).merge(api::router(state)))
        .layer(cors::cors_layer(cors_origins))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(?error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(?error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
