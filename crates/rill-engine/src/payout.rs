//! Payment gateway seam and the continuous micro-payment policy.
//!
//! The settle-at-end policy never touches the gateway mid-session; in
//! continuous mode every confirmed playing heartbeat pays the listener for
//! the elapsed time, debits the campaign, and accumulates a ledger entry
//! that survives reconnects.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rill_store::{CampaignStore, SessionStore};

/// Result of one ledger transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub delivered_amount: f64,
}

/// External settlement ledger capable of paying a listener address.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn transfer(&self, destination: &str, amount: f64) -> Result<TransferOutcome>;
}

/// Logging stand-in for the real ledger.
#[derive(Debug, Default)]
pub struct NoopPaymentGateway;

#[async_trait]
impl PaymentGateway for NoopPaymentGateway {
    async fn transfer(&self, destination: &str, amount: f64) -> Result<TransferOutcome> {
        tracing::debug!(destination, amount, "payment transfer (noop gateway)");
        Ok(TransferOutcome {
            delivered_amount: amount,
        })
    }
}

/// One applied micro-payment tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickPayment {
    pub amount: f64,
    pub seconds: u64,
    /// True when this tick drained the campaign budget.
    pub exhausted: bool,
}

/// Per-connection accumulator for the continuous policy.
pub struct MicroPaymentTicker {
    campaigns: Arc<dyn CampaignStore>,
    sessions: Arc<dyn SessionStore>,
    payments: Arc<dyn PaymentGateway>,
    campaign_id: u64,
    listener_address: String,
    rate_per_second: f64,
    last_tick_unix_ms: u64,
    total_paid: f64,
    total_seconds: u64,
}

impl MicroPaymentTicker {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        sessions: Arc<dyn SessionStore>,
        payments: Arc<dyn PaymentGateway>,
        campaign_id: u64,
        listener_address: String,
        rate_per_second: f64,
        start_unix_ms: u64,
    ) -> Self {
        Self {
            campaigns,
            sessions,
            payments,
            campaign_id,
            listener_address,
            rate_per_second,
            last_tick_unix_ms: start_unix_ms,
            total_paid: 0.0,
            total_seconds: 0,
        }
    }

    /// Amount already transferred across this connection's ticks.
    pub fn total_paid(&self) -> f64 {
        self.total_paid
    }

    pub fn total_seconds(&self) -> u64 {
        self.total_seconds
    }

    /// Pays for the playing time since the previous tick: transfers the
    /// owed amount (clamped to the remaining budget), then atomically debits
    /// the campaign and accumulates the listener's ledger entry. The budget
    /// is only debited once the transfer went through.
    pub async fn tick(&mut self, now_unix_ms: u64) -> Result<Option<TickPayment>> {
        let elapsed = rill_core::elapsed_seconds_between(self.last_tick_unix_ms, now_unix_ms);
        if elapsed <= 0.0 {
            return Ok(None);
        }

        let Some(campaign) = self.campaigns.campaign(self.campaign_id)? else {
            bail!("campaign {} disappeared mid-session", self.campaign_id);
        };
        let owed = (elapsed * self.rate_per_second).min(campaign.remaining_amount);
        if owed <= 0.0 {
            self.last_tick_unix_ms = now_unix_ms;
            return Ok(Some(TickPayment {
                amount: 0.0,
                seconds: 0,
                exhausted: true,
            }));
        }

        self.payments.transfer(&self.listener_address, owed).await?;
        let debit = self.campaigns.debit_remaining(self.campaign_id, owed)?;
        self.last_tick_unix_ms = now_unix_ms;
        let seconds = elapsed.round() as u64;
        self.sessions.record_ledger_tick(
            self.campaign_id,
            &self.listener_address,
            seconds,
            debit.applied,
            now_unix_ms,
        )?;
        self.total_paid += debit.applied;
        self.total_seconds += seconds;

        Ok(Some(TickPayment {
            amount: debit.applied,
            seconds,
            exhausted: debit.completed,
        }))
    }
}
