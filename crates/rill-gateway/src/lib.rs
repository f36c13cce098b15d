//! HTTP and WebSocket surface for the listening-session engine.
//!
//! REST routes manage campaigns and listening sessions; the WebSocket route
//! upgrades one listener connection and hands it to the session engine.

mod api_error;
mod routes;
mod websocket;


use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use rill_engine::{ConnectionRegistry, PaymentGateway, SessionConfig, SessionDeps};
use rill_store::{CampaignStore, SessionStore};
use tokio::net::TcpListener;

use routes::{
    handle_activate_campaign, handle_active_session, handle_create_campaign, handle_get_campaign,
    handle_list_campaigns, handle_listening_history, handle_start_listening,
    handle_stop_listening,
};
use websocket::handle_listen_ws_upgrade;

const CAMPAIGNS_ENDPOINT: &str = "/campaigns";
const CAMPAIGN_ENDPOINT: &str = "/campaigns/{id}";
const CAMPAIGN_ACTIVATE_ENDPOINT: &str = "/campaigns/{id}/activate";
const LISTENING_START_ENDPOINT: &str = "/listening/start";
const LISTENING_STOP_ENDPOINT: &str = "/listening/{id}/stop";
const LISTENING_ACTIVE_ENDPOINT: &str = "/listening/active/{listener_address}";
const LISTENING_HISTORY_ENDPOINT: &str = "/listening/history/{listener_address}";
const LISTEN_WS_ENDPOINT: &str = "/ws/listen/{campaign_id}/{listener_address}";

/// Shared state behind every route.
pub struct GatewayState {
    pub campaigns: Arc<dyn CampaignStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub payments: Arc<dyn PaymentGateway>,
    pub registry: Arc<ConnectionRegistry>,
    pub session_config: SessionConfig,
}

impl GatewayState {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        sessions: Arc<dyn SessionStore>,
        payments: Arc<dyn PaymentGateway>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            campaigns,
            sessions,
            payments,
            registry: Arc::new(ConnectionRegistry::new()),
            session_config,
        }
    }

    fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            campaigns: Arc::clone(&self.campaigns),
            sessions: Arc::clone(&self.sessions),
            payments: Arc::clone(&self.payments),
            registry: Arc::clone(&self.registry),
        }
    }
}

pub fn build_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(
            CAMPAIGNS_ENDPOINT,
            get(handle_list_campaigns).post(handle_create_campaign),
        )
        .route(CAMPAIGN_ENDPOINT, get(handle_get_campaign))
        .route(CAMPAIGN_ACTIVATE_ENDPOINT, post(handle_activate_campaign))
        .route(LISTENING_START_ENDPOINT, post(handle_start_listening))
        .route(LISTENING_STOP_ENDPOINT, post(handle_stop_listening))
        .route(LISTENING_ACTIVE_ENDPOINT, get(handle_active_session))
        .route(LISTENING_HISTORY_ENDPOINT, get(handle_listening_history))
        .route(LISTEN_WS_ENDPOINT, get(handle_listen_ws_upgrade))
        .with_state(state)
}

/// Binds and serves the gateway until ctrl-c.
pub async fn run_gateway_server(bind: &str, state: Arc<GatewayState>) -> Result<()> {
    let bind_addr = bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid bind address '{bind}'"))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway address")?;
    tracing::info!(%local_addr, ws_endpoint = LISTEN_WS_ENDPOINT, "gateway listening");

    let app = build_gateway_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")
}
