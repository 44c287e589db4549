//! Pocket WebSocket gateway
//!
//! Axum server exposing the wallet agent to browsers. Each websocket
//! connection is one session; tool servers are spawned at startup.
//!
//! ```text
//! pocket-server wallet-server.js dex-server.py
//! ```

mod events;
mod handlers;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use pocket_core::config::Settings;
use pocket_core::{Orchestrator, ProviderEndpoint, ProviderRegistry};
use pocket_runtime::{AnthropicProvider, McpConnector};
use pocket_wallet::{wallet_profile, BASE_PROMPT};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::handlers::{health_check, list_tools, ws_handler};
use crate::state::AppState;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("POCKET_CONFIG").ok().map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref()).context("failed to load settings")?;

    // Initialize LLM provider
    let llm = AnthropicProvider::from_env().context("Anthropic provider unavailable")?;

    // Tool servers from settings plus script arguments
    let mut endpoints = settings.providers.clone();
    for script in std::env::args().skip(1) {
        match ProviderEndpoint::from_script(&script) {
            Ok(endpoint) => endpoints.push(endpoint),
            Err(e) => tracing::warn!(script = %script, error = %e, "Skipping tool server"),
        }
    }

    let mut registry = ProviderRegistry::new();
    let connector = McpConnector::new().with_call_timeout(settings.tool_timeout());
    let report = registry.register_all(&connector, &endpoints).await;
    for (name, reason) in &report.failed {
        tracing::warn!(provider = %name, reason = %reason, "Tool server failed to connect");
    }
    if registry.is_empty() {
        anyhow::bail!("no tool server could be connected ({} configured)", endpoints.len());
    }

    tracing::info!("Registered {} tools:", registry.all_tools().len());
    for name in registry.tool_names() {
        tracing::info!("  • {}", name);
    }

    let profile = wallet_profile()?.with_enrichment(settings.enrichment.iter().cloned());
    let orchestrator = Orchestrator::new(Arc::new(llm), Arc::new(registry), Arc::new(profile), &settings, BASE_PROMPT);
    let state = AppState::new(orchestrator);

    let app = router(state.clone());

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Pocket gateway running on http://{}", addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health     - Health check");
    tracing::info!("  GET  /api/tools  - Aggregated tool catalog");
    tracing::info!("  GET  /ws         - Agent session over WebSocket");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    state.orchestrator.shutdown().await;
    Ok(())
}

fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/tools", get(list_tools))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use pocket_core::testing::{ScriptedProvider, StaticConnector, StaticToolProvider};
    use pocket_core::ContextProfile;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let connector = StaticConnector::new().with_provider(
            "wallet",
            StaticToolProvider::new("wallet").with_tool("check-balance").with_tool("get-price"),
        );
        let mut registry = ProviderRegistry::new();
        registry
            .register(&connector, &ProviderEndpoint::new("wallet", "node", vec![]))
            .await
            .unwrap();
        AppState::new(Orchestrator::new(
            Arc::new(ScriptedProvider::new()),
            Arc::new(registry),
            Arc::new(ContextProfile::new()),
            &Settings::default(),
            BASE_PROMPT,
        ))
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let json = get_json(router(test_state().await), "/health").await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["providers"], 1);
        assert_eq!(json["tools"], 2);
    }

    #[tokio::test]
    async fn test_list_tools() {
        let json = get_json(router(test_state().await), "/api/tools").await;
        let names: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["check-balance", "get-price"]);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let response = router(test_state().await).oneshot(req).await.unwrap();
        assert!(response.status().is_client_error());
    }
}
