pub mod handlers;
pub mod rate_limit;
pub mod state;
pub mod upstream;
pub mod url_validation;

use crate::{config::Config, error::Result};
use axum::{
    Router,
    http::HeaderValue,
    middleware::{self, map_response},
    response::Response,
    routing::get,
};
use state::AppState;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Build the router for the given configuration.
///
/// Kept separate from [`start`] so tests can drive it with `oneshot` or serve it
/// on their own listener.
pub fn build_router(config: Config) -> Result<Router> {
    Ok(router(AppState::new(config)?))
}

fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .route(&state.config.proxy_path, get(handlers::proxy::proxy));

    // The proxy itself may be mounted at the root
    if state.config.proxy_path != "/" {
        app = app.route("/", get(handlers::health::health_check));
    }

    app.layer(middleware::from_fn_with_state(
        state.clone(),
        rate_limit::rate_limit_middleware,
    ))
    .layer(map_response(add_version_header))
    .layer(CorsLayer::permissive())
    .with_state(state)
}

async fn add_version_header(mut response: Response) -> Response {
    response.headers_mut().insert(
        "x-hls-relay-version",
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Start the Axum HTTP server and run until Ctrl-C
pub async fn start(config: Config) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(config)?;
    let shutdown = CancellationToken::new();

    if let Some(limiter) = state.rate_limiter.clone() {
        rate_limit::spawn_cleanup(limiter, shutdown.clone());
    }

    let proxy_path = state.config.proxy_path.clone();
    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🚀 Proxy listening on http://{}{}?url=", addr, proxy_path);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, draining connections");
                signal.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    shutdown.cancel();
    Ok(())
}
