//! Dashboard: axum web server for real-time monitoring.
//!
//! Serves a JSON API and a self-contained HTML page that polls it.

pub mod routes;

use anyhow::Result;
use axum::{
    http::{header, Method},
    response::Html,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use routes::AppState;

const DASHBOARD_HTML: &str = include_str!("templates/index.html");

/// Bind the dashboard port and serve in a background task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port, "Dashboard listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server stopped");
        }
    });
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/positions", get(routes::get_positions))
        .route("/api/opportunities", get(routes::get_opportunities))
        .route("/api/pnl", get(routes::get_pnl))
        .route("/api/risk", get(routes::get_risk))
        .route("/api/trades", get(routes::get_trades))
        .route("/api/latency", get(routes::get_latency))
        .route("/health", get(routes::health))
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::latency::{LatencyLogger, OP_ORDER_PLACEMENT};
    use crate::storage::repository::TradeRepository;
    use crate::strategy::signals::tests::snapshot;
    use crate::types::{BotState, Side, TradeSignal};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use routes::DashboardState;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        Arc::new(DashboardState::new(
            BotState::new(true, 1000.0),
            Arc::new(LatencyLogger::default()),
            None,
        ))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, _) = get_json(build_router(test_state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (status, json) = get_json(build_router(test_state()), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "RUNNING");
        assert_eq!(json["cycle_count"], 0);
    }

    #[tokio::test]
    async fn test_collection_endpoints_start_empty() {
        for uri in ["/api/positions", "/api/opportunities", "/api/trades"] {
            let (status, json) = get_json(build_router(test_state()), uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(json.as_array().map(Vec::len), Some(0), "{uri}");
        }
    }

    #[tokio::test]
    async fn test_pnl_and_risk_endpoints() {
        let (status, json) = get_json(build_router(test_state()), "/api/pnl").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_pnl"], 0.0);

        let (status, _) = get_json(build_router(test_state()), "/api/risk").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_latency_endpoint() {
        let latency = Arc::new(LatencyLogger::default());
        latency.record_direct(OP_ORDER_PLACEMENT, 900.0, true);
        let state = Arc::new(DashboardState::new(BotState::new(true, 1000.0), latency, None));

        let (status, json) = get_json(build_router(state), "/api/latency").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["operations"][0]["operation"], OP_ORDER_PLACEMENT);
        assert_eq!(json["alerts"][0]["issue"], "p95_latency_high");
    }

    #[tokio::test]
    async fn test_trades_from_repository() {
        let repo = TradeRepository::in_memory().await.unwrap();
        let snap = snapshot("Will it snow in Miami?", 0.02, 60_000.0);
        for _ in 0..3 {
            let signal = TradeSignal::buy("TAIL_BETTING_V1", &snap, Side::Yes, 0.02, 2.0, 0.6).unwrap();
            repo.insert_signal(&signal, true).await.unwrap();
        }
        let state = Arc::new(DashboardState::new(
            BotState::new(true, 1000.0),
            Arc::new(LatencyLogger::default()),
            Some(repo),
        ));

        let (status, json) = get_json(build_router(state), "/api/trades?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().map(Vec::len), Some(2));
        assert_eq!(json[0]["strategy_id"], "TAIL_BETTING_V1");
    }

    #[tokio::test]
    async fn test_dashboard_html() {
        let resp = build_router(test_state())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 200_000).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("POLYBOT"));
        assert!(html.contains("/api/status"));
    }
}
