//! Web server for the governance engine
//!
//! REST endpoints for canonical ingest, decision checks, approvals,
//! and policy administration.

pub mod routes;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared state for the web server
pub struct AppState {
    /// Database path; handlers open their own connection per request
    pub db_path: String,
    /// Server start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Start the web server
pub async fn start_server(port: u16, db_path: String) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        db_path,
        started_at: chrono::Utc::now(),
    });

    let app = Router::new()
        .route("/health", get(routes::get_health))
        // ingest
        .route("/ingest/canonical", post(routes::ingest_canonical))
        // sdk decision surface
        .route("/sdk/check_and_header", post(routes::check_and_header))
        // admin
        .route("/admin/approvals", get(routes::list_approvals))
        .route("/admin/approvals/:id/decision", post(routes::decide_approval))
        .route("/admin/metrics", get(routes::get_metrics))
        .route("/admin/recompute_all", post(routes::recompute_all))
        // policy configuration
        .route(
            "/policies/risk_scoring",
            get(routes::get_risk_config).put(routes::put_risk_config),
        )
        .route(
            "/policies/classifications",
            get(routes::get_classifications).put(routes::put_classifications),
        )
        .route("/policies/actions", get(routes::list_action_policies))
        .route("/policies/actions/:id", put(routes::put_action_policy))
        .route("/policies/apply", post(routes::apply_policies))
        // governance views
        .route("/agents", get(routes::list_agents))
        .route("/agents/:agent_id/governance", get(routes::get_governance))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🌐 Governance engine listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
