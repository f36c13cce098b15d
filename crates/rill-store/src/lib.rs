//! Campaign and listening-session persistence for Rill.
//!
//! Defines the storage traits the session engine meters against, plus the
//! SQLite and in-memory backends. The budget debit is the one
//! correctness-critical serialization point: both backends apply it under a
//! per-store critical section so concurrent settlements can never overdraw
//! a campaign.

use anyhow::Result;
use serde::{Deserialize, Serialize};

mod memory;
mod sqlite;
#[cfg(test)]
mod tests;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Lifecycle of a funded campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Unpaid,
    Paid,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => anyhow::bail!("unknown campaign status '{other}'"),
        }
    }
}

/// A funded pay-per-listen promotion with a fixed per-second rate and a
/// depletable budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: u64,
    pub artist_address: String,
    pub song_title: String,
    pub song_url: String,
    pub total_amount: f64,
    pub rate_per_second: f64,
    pub remaining_amount: f64,
    pub created_unix_ms: u64,
    pub status: CampaignStatus,
}

/// Fields required to create a campaign; it always starts unpaid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub artist_address: String,
    pub song_title: String,
    pub song_url: String,
    pub total_amount: f64,
    pub rate_per_second: f64,
}

/// One listener's metered playback of one campaign. Open while
/// `end_unix_ms` is null; finalized exactly once by settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListeningSession {
    pub id: u64,
    pub campaign_id: u64,
    pub listener_address: String,
    pub start_unix_ms: u64,
    pub end_unix_ms: Option<u64>,
    pub total_seconds: Option<u64>,
    pub earned_amount: Option<f64>,
}

impl ListeningSession {
    pub fn is_open(&self) -> bool {
        self.end_unix_ms.is_none()
    }
}

/// Per-listener accumulation across reconnects, used by the continuous
/// micro-payment policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerLedgerEntry {
    pub campaign_id: u64,
    pub listener_address: String,
    pub seconds_listened: u64,
    pub amount_earned: f64,
    pub last_payment_unix_ms: u64,
}

/// Outcome of an atomic budget debit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CampaignDebit {
    /// Amount actually deducted, clamped to what was remaining.
    pub applied: f64,
    /// Budget remaining after the debit.
    pub remaining: f64,
    /// True when this debit exhausted the budget and completed the campaign.
    pub completed: bool,
}

/// Campaign persistence consumed by the session engine and gateway routes.
pub trait CampaignStore: Send + Sync {
    fn create_campaign(&self, new: NewCampaign) -> Result<Campaign>;

    fn campaign(&self, id: u64) -> Result<Option<Campaign>>;

    fn campaigns(&self) -> Result<Vec<Campaign>>;

    /// Looks up a campaign only if it is in the paid state; sessions may
    /// never meter against anything else.
    fn paid_campaign(&self, id: u64) -> Result<Option<Campaign>>;

    /// Marks a campaign paid after its funding was verified.
    fn mark_paid(&self, id: u64) -> Result<Campaign>;

    /// Atomically deducts up to `requested` from the remaining budget.
    ///
    /// The read and conditional write happen under a single-writer
    /// discipline per store, the applied amount is clamped to the remaining
    /// budget, and the campaign transitions to completed in the same
    /// critical section when the budget reaches zero.
    fn debit_remaining(&self, id: u64, requested: f64) -> Result<CampaignDebit>;
}

/// Listening-session persistence consumed by the session engine and routes.
pub trait SessionStore: Send + Sync {
    fn create_session(
        &self,
        campaign_id: u64,
        listener_address: &str,
        start_unix_ms: u64,
    ) -> Result<ListeningSession>;

    fn session(&self, id: u64) -> Result<Option<ListeningSession>>;

    /// The listener's single open session, regardless of campaign.
    fn open_session_for_listener(&self, listener_address: &str)
        -> Result<Option<ListeningSession>>;

    /// The open session for one (campaign, listener) pair.
    fn open_session(
        &self,
        campaign_id: u64,
        listener_address: &str,
    ) -> Result<Option<ListeningSession>>;

    /// Claims an open session for settlement by writing its end timestamp
    /// and duration. Returns false when the session was already closed,
    /// which is the idempotence guard that keeps settlement exactly-once.
    fn close_open_session(&self, id: u64, end_unix_ms: u64, total_seconds: u64) -> Result<bool>;

    /// Records the settled earnings on an already-closed session.
    fn record_session_earnings(&self, id: u64, earned_amount: f64) -> Result<()>;

    /// Closed sessions for a listener, newest first.
    fn closed_sessions_for_listener(
        &self,
        listener_address: &str,
    ) -> Result<Vec<ListeningSession>>;

    /// Accumulates one continuous-mode payment tick onto the listener's
    /// ledger entry, creating it on first payment.
    fn record_ledger_tick(
        &self,
        campaign_id: u64,
        listener_address: &str,
        seconds: u64,
        amount: f64,
        paid_unix_ms: u64,
    ) -> Result<ListenerLedgerEntry>;

    fn ledger_entry(
        &self,
        campaign_id: u64,
        listener_address: &str,
    ) -> Result<Option<ListenerLedgerEntry>>;
}
