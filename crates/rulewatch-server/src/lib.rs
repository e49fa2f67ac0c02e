pub mod error;
pub mod hub;
pub mod poller;
pub mod routes;
pub mod source;
pub mod state;

use axum::routing::get;
use axum::Router;
use rulewatch_core::config::Config;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::poller::Poller;
use crate::state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health))
        // Rules
        .route(
            "/rules",
            get(routes::rules::list_rules).post(routes::rules::create_rule),
        )
        // Action log
        .route("/actions", get(routes::actions::list_actions))
        // Latest metrics
        .route("/campaigns", get(routes::campaigns::list_campaigns))
        // Events (SSE)
        .route("/events", get(routes::events::sse_events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the HTTP server and the evaluation loop on `0.0.0.0:{config.port}`.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(config, listener).await
}

/// Like [`serve`], on a pre-bound listener (useful with port 0).
///
/// The evaluation loop stops when this future completes or is dropped.
pub async fn serve_on(config: Config, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app_state = AppState::new(config.event_buffer);

    let source = source::from_config(&config.metrics_api, config.fetch_timeout())?;
    let poller = Arc::new(Poller::new(
        app_state.store.clone(),
        app_state.events.clone(),
        source,
        config.campaigns.clone(),
        config.fetch_timeout(),
    ));
    let _poll_task = poller.spawn(config.poll_interval());
    tracing::info!(
        campaigns = ?config.campaigns,
        interval_secs = config.poll_interval_secs,
        "evaluation loop started"
    );

    let app = build_router(app_state);
    tracing::info!("rulewatch listening on http://localhost:{actual_port}");

    axum::serve(listener, app).await?;
    Ok(())
}
