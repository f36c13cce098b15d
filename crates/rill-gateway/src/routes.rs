use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rill_engine::SettlementFinalizer;
use rill_store::{Campaign, CampaignStatus, ListeningSession, NewCampaign};
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::GatewayState;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateCampaignRequest {
    pub artist_address: String,
    pub song_title: String,
    pub song_url: String,
    pub total_amount: f64,
    pub rate_per_second: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartListeningRequest {
    pub campaign_id: u64,
    pub listener_address: String,
}

pub(crate) async fn handle_create_campaign(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    if request.total_amount <= 0.0 {
        return Err(ApiError::bad_request(
            "invalid_total_amount",
            "total_amount must be greater than zero",
        ));
    }
    if request.rate_per_second <= 0.0 {
        return Err(ApiError::bad_request(
            "invalid_rate",
            "rate_per_second must be greater than zero",
        ));
    }
    if request.artist_address.trim().is_empty() {
        return Err(ApiError::bad_request(
            "invalid_artist_address",
            "artist_address must not be empty",
        ));
    }

    let campaign = state.campaigns.create_campaign(NewCampaign {
        artist_address: request.artist_address,
        song_title: request.song_title,
        song_url: request.song_url,
        total_amount: request.total_amount,
        rate_per_second: request.rate_per_second,
    })?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

pub(crate) async fn handle_get_campaign(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<u64>,
) -> Result<Json<Campaign>, ApiError> {
    let campaign = state
        .campaigns
        .campaign(id)?
        .ok_or_else(|| ApiError::not_found("campaign_not_found", format!("campaign {id}")))?;
    Ok(Json(campaign))
}

pub(crate) async fn handle_list_campaigns(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Vec<Campaign>>, ApiError> {
    Ok(Json(state.campaigns.campaigns()?))
}

/// Marks a campaign paid once its funding was verified out of band.
pub(crate) async fn handle_activate_campaign(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<u64>,
) -> Result<Json<Campaign>, ApiError> {
    let campaign = state
        .campaigns
        .campaign(id)?
        .ok_or_else(|| ApiError::not_found("campaign_not_found", format!("campaign {id}")))?;
    if campaign.status != CampaignStatus::Unpaid {
        return Err(ApiError::conflict(
            "campaign_not_unpaid",
            format!("campaign {id} is already {}", campaign.status.as_str()),
        ));
    }
    Ok(Json(state.campaigns.mark_paid(id)?))
}

pub(crate) async fn handle_start_listening(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<StartListeningRequest>,
) -> Result<(StatusCode, Json<ListeningSession>), ApiError> {
    let listener_address = request.listener_address.trim();
    if listener_address.is_empty() {
        return Err(ApiError::bad_request(
            "invalid_listener_address",
            "listener_address must not be empty",
        ));
    }
    if state.campaigns.paid_campaign(request.campaign_id)?.is_none() {
        return Err(ApiError::not_found(
            "campaign_not_active",
            format!("campaign {} is not accepting listeners", request.campaign_id),
        ));
    }
    if let Some(open) = state.sessions.open_session_for_listener(listener_address)? {
        return Err(ApiError::conflict(
            "session_already_open",
            format!("listener already has open session {}", open.id),
        ));
    }

    let session = state.sessions.create_session(
        request.campaign_id,
        listener_address,
        rill_core::current_unix_timestamp_ms(),
    )?;
    tracing::info!(
        session_id = session.id,
        campaign_id = session.campaign_id,
        listener_address,
        "listening session created"
    );
    Ok((StatusCode::CREATED, Json(session)))
}

/// Settles an open session that no longer has a live connection.
pub(crate) async fn handle_stop_listening(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<u64>,
) -> Result<Json<ListeningSession>, ApiError> {
    let session = state
        .sessions
        .session(id)?
        .ok_or_else(|| ApiError::not_found("session_not_found", format!("session {id}")))?;
    if !session.is_open() {
        return Err(ApiError::conflict(
            "session_already_closed",
            format!("session {id} was already settled"),
        ));
    }
    let campaign = state
        .campaigns
        .campaign(session.campaign_id)?
        .ok_or_else(|| ApiError::internal("session references a missing campaign"))?;

    let mut finalizer = SettlementFinalizer::new(
        Arc::clone(&state.campaigns),
        Arc::clone(&state.sessions),
        session.id,
        campaign.id,
        campaign.rate_per_second,
        session.start_unix_ms,
    );
    finalizer.finalize(rill_core::current_unix_timestamp_ms(), "manual_stop")?;

    let settled = state
        .sessions
        .session(id)?
        .ok_or_else(|| ApiError::internal("settled session disappeared"))?;
    Ok(Json(settled))
}

pub(crate) async fn handle_active_session(
    State(state): State<Arc<GatewayState>>,
    Path(listener_address): Path<String>,
) -> Result<Json<ListeningSession>, ApiError> {
    let session = state
        .sessions
        .open_session_for_listener(&listener_address)?
        .ok_or_else(|| {
            ApiError::not_found(
                "no_active_session",
                format!("no open session for {listener_address}"),
            )
        })?;
    Ok(Json(session))
}

pub(crate) async fn handle_listening_history(
    State(state): State<Arc<GatewayState>>,
    Path(listener_address): Path<String>,
) -> Result<Json<Vec<ListeningSession>>, ApiError> {
    Ok(Json(
        state.sessions.closed_sessions_for_listener(&listener_address)?,
    ))
}
