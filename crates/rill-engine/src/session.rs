//! Session manager: drives one listener connection from CONNECTING to
//! TERMINATED and hands the outcome to settlement exactly once.

use std::sync::Arc;
use std::time::Duration;

use rill_protocol::{
    parse_listener_frame, ListenerFrame, OutboundFrame, CLOSE_CODE_CAMPAIGN_INACTIVE,
    CLOSE_CODE_NORMAL, CLOSE_CODE_NO_ACTIVE_SESSION,
};
use rill_store::{CampaignStore, SessionStore};
use tokio::sync::mpsc;

use crate::anomaly::{ProgressTracker, ProgressVerdict};
use crate::error::{PreconditionFailure, SessionError};
use crate::keepalive::start_keepalive_supervisor;
use crate::metering::projected_earnings;
use crate::payout::{MicroPaymentTicker, PaymentGateway};
use crate::registry::{client_id, ConnectionRegistry};
use crate::settlement::{Settlement, SettlementFinalizer};
use crate::transport::{ListenerSink, ListenerStream};

/// How session earnings reach the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeteringPolicy {
    /// Compute earnings once, at termination, from wall-clock duration.
    /// Tolerates disconnect/reconnect without double-charging the gateway.
    #[default]
    SettleAtEnd,
    /// Pay per confirmed playing heartbeat through the payment gateway.
    Continuous,
}

/// Per-gateway session tunables.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub keepalive_interval: Duration,
    pub metering_policy: MeteringPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            metering_policy: MeteringPolicy::SettleAtEnd,
        }
    }
}

/// Collaborators a session runs against.
#[derive(Clone)]
pub struct SessionDeps {
    pub campaigns: Arc<dyn CampaignStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub payments: Arc<dyn PaymentGateway>,
    pub registry: Arc<ConnectionRegistry>,
}

/// Why a session left the ACTIVE state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    ClientDisconnect,
    ManualStop,
    Paused,
    VolumeMuted,
    ProtocolError,
    IrregularProgress,
    BudgetExhausted,
    LivenessFailure,
    ProcessingError,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnect => "client_disconnect",
            Self::ManualStop => "manual_stop",
            Self::Paused => "paused",
            Self::VolumeMuted => "volume_muted",
            Self::ProtocolError => "protocol_error",
            Self::IrregularProgress => "irregular_progress",
            Self::BudgetExhausted => "budget_exhausted",
            Self::LivenessFailure => "liveness_failure",
            Self::ProcessingError => "processing_error",
        }
    }
}

/// Result of a session that reached ACTIVE and was settled.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub reason: TerminationReason,
    pub warnings: u32,
    pub settlement: Settlement,
}

async fn send_frame(sink: &Arc<dyn ListenerSink>, frame: &OutboundFrame) -> bool {
    match frame.to_text() {
        Ok(text) => sink.send_text(text).await.is_ok(),
        Err(error) => {
            tracing::error!(%error, "failed to serialize outbound frame");
            false
        }
    }
}

/// Runs one listening connection to completion.
///
/// Verifies the connect-time preconditions (paid campaign, open session),
/// then enters the receive loop: every inbound frame is classified, checked
/// against the pause/mute gates and the anomaly detector, metered, and
/// answered with an earnings projection. Whatever ends the loop, the
/// keepalive supervisor is cancelled and joined, the registry entry is
/// released, and settlement runs exactly once.
pub async fn run_listening_session<S: ListenerStream>(
    deps: &SessionDeps,
    config: &SessionConfig,
    campaign_id: u64,
    listener_address: &str,
    mut stream: S,
    sink: Arc<dyn ListenerSink>,
) -> Result<SessionOutcome, SessionError> {
    // CONNECTING: precondition failures close with a distinguishing code
    // and never reach settlement.
    let campaign = deps.campaigns.paid_campaign(campaign_id)?;
    let Some(campaign) = campaign else {
        tracing::warn!(campaign_id, "connection to inactive or unknown campaign");
        let _ = sink.close(CLOSE_CODE_CAMPAIGN_INACTIVE).await;
        return Err(PreconditionFailure::CampaignInactive(campaign_id).into());
    };
    let session = deps.sessions.open_session(campaign_id, listener_address)?;
    let Some(session) = session else {
        tracing::warn!(listener_address, campaign_id, "no open listening session");
        let _ = sink.close(CLOSE_CODE_NO_ACTIVE_SESSION).await;
        return Err(PreconditionFailure::NoActiveSession {
            campaign_id,
            listener_address: listener_address.to_string(),
        }
        .into());
    };

    // ACTIVE
    let client_id = client_id(listener_address, campaign_id);
    let start_unix_ms = rill_core::current_unix_timestamp_ms();
    deps.registry.register(&client_id, start_unix_ms)?;

    let (failure_tx, mut failure_rx) = mpsc::channel::<String>(1);
    let mut keepalive = match start_keepalive_supervisor(
        Arc::clone(&sink),
        config.keepalive_interval,
        failure_tx,
    ) {
        Ok(keepalive) => keepalive,
        Err(error) => {
            let _ = deps.registry.remove(&client_id);
            return Err(SessionError::Persistence(error));
        }
    };

    let mut tracker = ProgressTracker::new();
    let mut finalizer = SettlementFinalizer::new(
        Arc::clone(&deps.campaigns),
        Arc::clone(&deps.sessions),
        session.id,
        campaign.id,
        campaign.rate_per_second,
        start_unix_ms,
    );
    let mut ticker = match config.metering_policy {
        MeteringPolicy::SettleAtEnd => None,
        MeteringPolicy::Continuous => Some(MicroPaymentTicker::new(
            Arc::clone(&deps.campaigns),
            Arc::clone(&deps.sessions),
            Arc::clone(&deps.payments),
            campaign.id,
            listener_address.to_string(),
            campaign.rate_per_second,
            start_unix_ms,
        )),
    };
    let mut warnings = 0_u32;
    tracing::info!(client_id, session_id = session.id, "listening session started");

    let reason = loop {
        tokio::select! {
            failure = failure_rx.recv() => {
                let detail = failure.unwrap_or_default();
                tracing::warn!(client_id, detail, "peer unreachable, terminating");
                break TerminationReason::LivenessFailure;
            }
            inbound = stream.next_text() => {
                let Some(inbound) = inbound else {
                    break TerminationReason::ClientDisconnect;
                };
                let text = match inbound {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::info!(client_id, %error, "listener transport error");
                        break TerminationReason::ClientDisconnect;
                    }
                };

                let heartbeat = match parse_listener_frame(&text) {
                    Ok(ListenerFrame::Pong) => continue,
                    Ok(ListenerFrame::Heartbeat(heartbeat)) => heartbeat,
                    Err(error) => {
                        tracing::error!(client_id, %error, "malformed listener frame");
                        send_frame(
                            &sink,
                            &OutboundFrame::error(
                                "malformed heartbeat frame",
                                "session terminated for protocol violation",
                            ),
                        )
                        .await;
                        break TerminationReason::ProtocolError;
                    }
                };

                let now_unix_ms = rill_core::current_unix_timestamp_ms();

                if !heartbeat.is_playing {
                    tracing::info!(client_id, "playback paused");
                    send_frame(&sink, &OutboundFrame::error("playback is paused", "")).await;
                    break TerminationReason::Paused;
                }
                if heartbeat.volume <= 0.0 {
                    tracing::info!(client_id, "volume muted");
                    send_frame(&sink, &OutboundFrame::error("volume is muted", "")).await;
                    break TerminationReason::VolumeMuted;
                }

                if let Some(observation) = tracker.observe(now_unix_ms, heartbeat.current_time) {
                    match observation.verdict {
                        ProgressVerdict::Severe => {
                            tracing::warn!(
                                client_id,
                                expected = format!("{:.2}", observation.expected_elapsed),
                                reported = format!("{:.2}", observation.reported_delta),
                                ratio = format!("{:.2}", observation.ratio),
                                "abnormal playback progress"
                            );
                            send_frame(
                                &sink,
                                &OutboundFrame::error(
                                    "abnormal playback progress detected",
                                    "session terminated for suspicious behavior",
                                ),
                            )
                            .await;
                            break TerminationReason::IrregularProgress;
                        }
                        ProgressVerdict::Mild => {
                            // WARNED: observable but does not change the
                            // termination path by itself.
                            warnings = warnings.saturating_add(1);
                            tracing::warn!(
                                client_id,
                                ratio = format!("{:.2}", observation.ratio),
                                "irregular playback progress, warning listener"
                            );
                            if !send_frame(
                                &sink,
                                &OutboundFrame::warning(
                                    "irregular playback progress detected",
                                    "the connection appears unstable",
                                ),
                            )
                            .await
                            {
                                break TerminationReason::ClientDisconnect;
                            }
                        }
                        ProgressVerdict::Normal => {}
                    }
                }

                if let Some(ticker) = ticker.as_mut() {
                    match ticker.tick(now_unix_ms).await {
                        Ok(Some(payment)) if payment.exhausted => {
                            send_frame(
                                &sink,
                                &OutboundFrame::error("campaign budget exhausted", ""),
                            )
                            .await;
                            break TerminationReason::BudgetExhausted;
                        }
                        Ok(_) => {}
                        Err(error) => {
                            tracing::error!(client_id, %error, "micro-payment tick failed");
                            break TerminationReason::ProcessingError;
                        }
                    }
                }

                let elapsed_seconds =
                    rill_core::elapsed_seconds_between(start_unix_ms, now_unix_ms);
                let projection = OutboundFrame::earnings(
                    projected_earnings(elapsed_seconds, campaign.rate_per_second),
                    elapsed_seconds,
                );
                if !send_frame(&sink, &projection).await {
                    break TerminationReason::ClientDisconnect;
                }
            }
        }
    };

    // TERMINATING: cancel and join the keepalive sibling before the
    // registry entry goes away, then settle exactly once.
    tracing::info!(client_id, reason = reason.as_str(), "listening session terminating");
    keepalive.shutdown().await;
    if let Err(error) = deps.registry.remove(&client_id) {
        tracing::error!(client_id, %error, "failed to release registry entry");
    }

    let now_unix_ms = rill_core::current_unix_timestamp_ms();
    let settle_result = match ticker {
        Some(ticker) => {
            finalizer.finalize_prepaid(now_unix_ms, reason.as_str(), ticker.total_paid())
        }
        None => finalizer.finalize(now_unix_ms, reason.as_str()),
    };
    let _ = sink.close(CLOSE_CODE_NORMAL).await;
    let settlement = settle_result?;

    Ok(SessionOutcome {
        reason,
        warnings,
        settlement,
    })
}
