//! In-memory store backend, used by tests and single-process setups that do
//! not need durability.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use crate::{
    Campaign, CampaignDebit, CampaignStatus, CampaignStore, ListenerLedgerEntry, ListeningSession,
    NewCampaign, SessionStore,
};

#[derive(Default)]
struct MemoryState {
    campaigns: HashMap<u64, Campaign>,
    next_campaign_id: u64,
    sessions: HashMap<u64, ListeningSession>,
    next_session_id: u64,
    ledger: HashMap<(u64, String), ListenerLedgerEntry>,
}

/// Mutex-held maps implementing both storage traits. The mutex is the
/// per-store single-writer discipline for budget debits.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl CampaignStore for MemoryStore {
    fn create_campaign(&self, new: NewCampaign) -> Result<Campaign> {
        let mut state = self.lock()?;
        state.next_campaign_id += 1;
        let campaign = Campaign {
            id: state.next_campaign_id,
            artist_address: new.artist_address,
            song_title: new.song_title,
            song_url: new.song_url,
            total_amount: new.total_amount,
            rate_per_second: new.rate_per_second,
            remaining_amount: new.total_amount,
            created_unix_ms: rill_core::current_unix_timestamp_ms(),
            status: CampaignStatus::Unpaid,
        };
        state.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    fn campaign(&self, id: u64) -> Result<Option<Campaign>> {
        Ok(self.lock()?.campaigns.get(&id).cloned())
    }

    fn campaigns(&self) -> Result<Vec<Campaign>> {
        let state = self.lock()?;
        let mut campaigns: Vec<Campaign> = state.campaigns.values().cloned().collect();
        campaigns.sort_by_key(|campaign| campaign.id);
        Ok(campaigns)
    }

    fn paid_campaign(&self, id: u64) -> Result<Option<Campaign>> {
        Ok(self
            .lock()?
            .campaigns
            .get(&id)
            .filter(|campaign| campaign.status == CampaignStatus::Paid)
            .cloned())
    }

    fn mark_paid(&self, id: u64) -> Result<Campaign> {
        let mut state = self.lock()?;
        let campaign = state
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| anyhow!("campaign {id} not found"))?;
        if campaign.status != CampaignStatus::Unpaid {
            anyhow::bail!("campaign {id} not in unpaid status");
        }
        campaign.status = CampaignStatus::Paid;
        Ok(campaign.clone())
    }

    fn debit_remaining(&self, id: u64, requested: f64) -> Result<CampaignDebit> {
        let mut state = self.lock()?;
        let campaign = state
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| anyhow!("campaign {id} not found for budget debit"))?;
        let applied = requested.max(0.0).min(campaign.remaining_amount.max(0.0));
        campaign.remaining_amount -= applied;
        let completed = campaign.remaining_amount <= 0.0;
        if completed {
            campaign.status = CampaignStatus::Completed;
        }
        Ok(CampaignDebit {
            applied,
            remaining: campaign.remaining_amount,
            completed,
        })
    }
}

impl SessionStore for MemoryStore {
    fn create_session(
        &self,
        campaign_id: u64,
        listener_address: &str,
        start_unix_ms: u64,
    ) -> Result<ListeningSession> {
        let mut state = self.lock()?;
        state.next_session_id += 1;
        let session = ListeningSession {
            id: state.next_session_id,
            campaign_id,
            listener_address: listener_address.to_string(),
            start_unix_ms,
            end_unix_ms: None,
            total_seconds: None,
            earned_amount: None,
        };
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    fn session(&self, id: u64) -> Result<Option<ListeningSession>> {
        Ok(self.lock()?.sessions.get(&id).cloned())
    }

    fn open_session_for_listener(
        &self,
        listener_address: &str,
    ) -> Result<Option<ListeningSession>> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .find(|session| session.listener_address == listener_address && session.is_open())
            .cloned())
    }

    fn open_session(
        &self,
        campaign_id: u64,
        listener_address: &str,
    ) -> Result<Option<ListeningSession>> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .find(|session| {
                session.campaign_id == campaign_id
                    && session.listener_address == listener_address
                    && session.is_open()
            })
            .cloned())
    }

    fn close_open_session(&self, id: u64, end_unix_ms: u64, total_seconds: u64) -> Result<bool> {
        let mut state = self.lock()?;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| anyhow!("listening session {id} not found"))?;
        if !session.is_open() {
            return Ok(false);
        }
        session.end_unix_ms = Some(end_unix_ms);
        session.total_seconds = Some(total_seconds);
        Ok(true)
    }

    fn record_session_earnings(&self, id: u64, earned_amount: f64) -> Result<()> {
        let mut state = self.lock()?;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| anyhow!("listening session {id} not found while recording earnings"))?;
        session.earned_amount = Some(earned_amount);
        Ok(())
    }

    fn closed_sessions_for_listener(
        &self,
        listener_address: &str,
    ) -> Result<Vec<ListeningSession>> {
        let state = self.lock()?;
        let mut sessions: Vec<ListeningSession> = state
            .sessions
            .values()
            .filter(|session| session.listener_address == listener_address && !session.is_open())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.start_unix_ms.cmp(&a.start_unix_ms));
        Ok(sessions)
    }

    fn record_ledger_tick(
        &self,
        campaign_id: u64,
        listener_address: &str,
        seconds: u64,
        amount: f64,
        paid_unix_ms: u64,
    ) -> Result<ListenerLedgerEntry> {
        let mut state = self.lock()?;
        let entry = state
            .ledger
            .entry((campaign_id, listener_address.to_string()))
            .or_insert_with(|| ListenerLedgerEntry {
                campaign_id,
                listener_address: listener_address.to_string(),
                seconds_listened: 0,
                amount_earned: 0.0,
                last_payment_unix_ms: 0,
            });
        entry.seconds_listened += seconds;
        entry.amount_earned += amount;
        entry.last_payment_unix_ms = paid_unix_ms;
        Ok(entry.clone())
    }

    fn ledger_entry(
        &self,
        campaign_id: u64,
        listener_address: &str,
    ) -> Result<Option<ListenerLedgerEntry>> {
        Ok(self
            .lock()?
            .ledger
            .get(&(campaign_id, listener_address.to_string()))
            .cloned())
    }
}
