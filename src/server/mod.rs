//! Static file server for local HLS/DASH media.
//!
//! Serves one directory with permissive CORS and byte-range support so a
//! player on another origin can fetch manifests and segments.

mod files;

pub use files::{content_type_for, parse_range_header, ByteRange};

use crate::config::ServerConfig;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Shared server context
#[derive(Clone)]
pub struct ServeContext {
    /// Canonical root every served path must stay under
    pub root: Arc<PathBuf>,
    pub cache_max_age_secs: u64,
}

impl ServeContext {
    pub fn new(root: PathBuf, cache_max_age_secs: u64) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Media directory not found: {:?}", root))?;
        Ok(Self {
            root: Arc::new(root),
            cache_max_age_secs,
        })
    }
}

/// Create the Axum router serving the media directory
pub fn create_router(ctx: ServeContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::RANGE])
        .expose_headers([
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
        ]);

    Router::new()
        .route("/", any(files::serve_root))
        .route("/*path", any(files::serve_file))
        .layer(cors)
        .layer(middleware::from_fn(plain_options))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Answer OPTIONS requests that are not CORS preflights with 204.
///
/// The CORS layer treats every OPTIONS as a preflight and replies 200, so
/// plain ones are answered here before reaching it.
async fn plain_options(request: Request<Body>, next: Next) -> Response {
    if request.method() != Method::OPTIONS
        || request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
    {
        return next.run(request).await;
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,HEAD,OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("range"),
    );
    headers.insert(header::ALLOW, HeaderValue::from_static("GET, HEAD, OPTIONS"));
    response
}

/// Bind and serve until a shutdown signal arrives
pub async fn start_server(config: &ServerConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    let ctx = ServeContext::new(config.directory.clone(), config.cache_max_age_secs)?;
    let root = ctx.root.clone();
    let app = create_router(ctx);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Serving {:?} at http://{}/", root, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
