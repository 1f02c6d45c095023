//! HTTP surface
//!
//! `/health` is always reachable. The extraction routes sit behind the
//! gatekeeper middleware, so a rejected request never reaches an extractor
//! and never opens a browser session.

use crate::config::Config;
use crate::error::CollectorError;
use crate::gatekeeper::{Gatekeeper, Unauthorized, TOKEN_HEADER};
use crate::models::ExtractRequest;
use crate::session::{HostLimiter, SessionOpener};
use crate::vendor::sg200::Sg200Sessions;
use crate::vendor::{Extractor, NetgearAccessControl, Sg200MacTable, Sg200SystemSummary};
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

const MISSING_FIELDS: &str = "ip, user, and pass fields are required in JSON body";

/// Everything the handlers need, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub mac_table: Arc<Sg200MacTable>,
    pub system_summary: Arc<Sg200SystemSummary>,
    pub netgear: Arc<NetgearAccessControl>,
}

impl AppState {
    pub fn new(gatekeeper: Gatekeeper, opener: Arc<dyn SessionOpener>, cfg: &Config) -> Self {
        let limiter = Arc::new(HostLimiter::new(cfg.sg200.sessions_per_host));
        let sessions = Sg200Sessions::new(opener, limiter);

        Self {
            gatekeeper: Arc::new(gatekeeper),
            mac_table: Arc::new(Sg200MacTable::new(
                sessions.clone(),
                cfg.sg200.port_labels.clone(),
            )),
            system_summary: Arc::new(Sg200SystemSummary::new(sessions)),
            netgear: Arc::new(NetgearAccessControl::new(cfg.http.clone())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let extraction = Router::new()
        .route("/sg200/mac-table", post(mac_table))
        .route("/sg200/system-summary", post(system_summary))
        .route("/netgear/access-control", post(access_control))
        .route_layer(middleware::from_fn_with_state(
            state.gatekeeper.clone(),
            require_authorization,
        ))
        .with_state(state);

    Router::new().route("/health", get(health)).merge(extraction)
}

/// Bind and serve until Ctrl-C
pub async fn serve(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!("Listening on {}", bind);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server terminated")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}

async fn require_authorization(
    State(gatekeeper): State<Arc<Gatekeeper>>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let token = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    match gatekeeper.authorize(client_ip.as_deref(), token) {
        Ok(()) => next.run(request).await,
        Err(rejected) => {
            tracing::warn!(
                "Rejected {} {} from {}",
                request.method(),
                request.uri().path(),
                client_ip.as_deref().unwrap_or("unknown peer")
            );
            rejected.into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn mac_table(State(state): State<AppState>, body: Bytes) -> Response {
    run_extractor(state.mac_table.as_ref(), &body).await
}

async fn system_summary(State(state): State<AppState>, body: Bytes) -> Response {
    run_extractor(state.system_summary.as_ref(), &body).await
}

async fn access_control(State(state): State<AppState>, body: Bytes) -> Response {
    run_extractor(state.netgear.as_ref(), &body).await
}

/// Shared request path for every extraction route
///
/// The body is parsed leniently: anything that is not a JSON object with the
/// three fields ends up as the same 400.
async fn run_extractor<E: Extractor>(extractor: &E, body: &[u8]) -> Response {
    let request: ExtractRequest = serde_json::from_slice(body).unwrap_or_default();
    let Some(target) = request.into_target() else {
        return CollectorError::InvalidRequest(MISSING_FIELDS.to_string()).into_response();
    };

    tracing::info!("[{}] {} requested", target.ip, extractor.name());
    match extractor.extract(&target).await {
        Ok(output) => Json(output).into_response(),
        Err(e) => {
            tracing::error!("[{}] {} failed: {}", target.ip, extractor.name(), e);
            e.into_response()
        }
    }
}

impl IntoResponse for CollectorError {
    fn into_response(self) -> Response {
        let body = match &self {
            CollectorError::InvalidRequest(msg) => json!({ "error": msg }),
            other => json!({ "error": other.to_string(), "kind": other.kind() }),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}
