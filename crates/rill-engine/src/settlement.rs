//! Exactly-once settlement of a finished listening session.

use std::sync::Arc;

use anyhow::{Context, Result};
use rill_store::{CampaignStore, SessionStore};

use crate::metering;

/// Final authoritative record of a settled session.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub session_id: u64,
    pub duration_seconds: f64,
    pub total_seconds: u64,
    pub earned_amount: f64,
    pub campaign_remaining: f64,
    pub campaign_completed: bool,
    /// True when a previous invocation already settled this session; no
    /// budget was debited by this call.
    pub already_settled: bool,
}

/// Performs the write-back of a session's final duration and earnings plus
/// the campaign budget debit, exactly once per session.
///
/// Two guards keep it exactly-once: a local flag for repeat calls on the
/// same finalizer, and the store-level conditional close for any other
/// path racing to settle the same session.
pub struct SettlementFinalizer {
    campaigns: Arc<dyn CampaignStore>,
    sessions: Arc<dyn SessionStore>,
    session_id: u64,
    campaign_id: u64,
    rate_per_second: f64,
    start_unix_ms: u64,
    settled: bool,
}

impl SettlementFinalizer {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        sessions: Arc<dyn SessionStore>,
        session_id: u64,
        campaign_id: u64,
        rate_per_second: f64,
        start_unix_ms: u64,
    ) -> Self {
        Self {
            campaigns,
            sessions,
            session_id,
            campaign_id,
            rate_per_second,
            start_unix_ms,
            settled: false,
        }
    }

    /// Settles from wall-clock duration: claims the open session, debits
    /// the campaign by `duration * rate` clamped to the remaining budget,
    /// and records the applied earnings.
    pub fn finalize(&mut self, now_unix_ms: u64, reason: &str) -> Result<Settlement> {
        self.finalize_inner(now_unix_ms, reason, None)
    }

    /// Continuous-policy settlement: the budget was already debited tick by
    /// tick, so only the session totals are recorded.
    pub fn finalize_prepaid(
        &mut self,
        now_unix_ms: u64,
        reason: &str,
        prepaid_amount: f64,
    ) -> Result<Settlement> {
        self.finalize_inner(now_unix_ms, reason, Some(prepaid_amount))
    }

    fn finalize_inner(
        &mut self,
        now_unix_ms: u64,
        reason: &str,
        prepaid_amount: Option<f64>,
    ) -> Result<Settlement> {
        let duration_seconds =
            rill_core::elapsed_seconds_between(self.start_unix_ms, now_unix_ms);
        let total_seconds = duration_seconds as u64;

        if self.settled {
            return Ok(self.already_settled(duration_seconds, total_seconds));
        }

        let result = self.commit(
            now_unix_ms,
            duration_seconds,
            total_seconds,
            prepaid_amount,
        );
        match result {
            Ok(settlement) => {
                self.settled = true;
                tracing::info!(
                    session_id = self.session_id,
                    campaign_id = self.campaign_id,
                    duration_seconds = format!("{duration_seconds:.2}"),
                    earned_amount = settlement.earned_amount,
                    reason,
                    "listening session settled"
                );
                if settlement.campaign_completed {
                    tracing::info!(
                        campaign_id = self.campaign_id,
                        "campaign completed (budget exhausted)"
                    );
                }
                Ok(settlement)
            }
            Err(error) => {
                let projected = metering::projected_earnings(duration_seconds, self.rate_per_second);
                tracing::error!(
                    session_id = self.session_id,
                    campaign_id = self.campaign_id,
                    duration_seconds = format!("{duration_seconds:.2}"),
                    projected_earnings = projected,
                    %error,
                    "session settlement failed"
                );
                Err(error)
            }
        }
    }

    fn commit(
        &self,
        now_unix_ms: u64,
        duration_seconds: f64,
        total_seconds: u64,
        prepaid_amount: Option<f64>,
    ) -> Result<Settlement> {
        let claimed = self
            .sessions
            .close_open_session(self.session_id, now_unix_ms, total_seconds)
            .with_context(|| format!("failed to close listening session {}", self.session_id))?;
        if !claimed {
            return Ok(self.already_settled(duration_seconds, total_seconds));
        }

        let (earned_amount, campaign_remaining, campaign_completed) = match prepaid_amount {
            Some(prepaid) => {
                let campaign = self
                    .campaigns
                    .campaign(self.campaign_id)
                    .with_context(|| format!("failed to load campaign {}", self.campaign_id))?
                    .with_context(|| format!("campaign {} missing at settlement", self.campaign_id))?;
                (
                    prepaid,
                    campaign.remaining_amount,
                    campaign.status == rill_store::CampaignStatus::Completed,
                )
            }
            None => {
                let requested = duration_seconds * self.rate_per_second;
                let debit = self
                    .campaigns
                    .debit_remaining(self.campaign_id, requested)
                    .with_context(|| {
                        format!("failed to debit campaign {} budget", self.campaign_id)
                    })?;
                (debit.applied, debit.remaining, debit.completed)
            }
        };

        self.sessions
            .record_session_earnings(self.session_id, earned_amount)
            .with_context(|| {
                format!(
                    "failed to record earnings for listening session {}",
                    self.session_id
                )
            })?;

        Ok(Settlement {
            session_id: self.session_id,
            duration_seconds,
            total_seconds,
            earned_amount,
            campaign_remaining,
            campaign_completed,
            already_settled: false,
        })
    }

    fn already_settled(&self, duration_seconds: f64, total_seconds: u64) -> Settlement {
        Settlement {
            session_id: self.session_id,
            duration_seconds,
            total_seconds,
            earned_amount: 0.0,
            campaign_remaining: 0.0,
            campaign_completed: false,
            already_settled: true,
        }
    }
}
