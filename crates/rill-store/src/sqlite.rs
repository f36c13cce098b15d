//! SQLite persistence backend for campaigns, sessions, and ledger entries.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::{
    Campaign, CampaignDebit, CampaignStatus, CampaignStore, ListenerLedgerEntry, ListeningSession,
    NewCampaign, SessionStore,
};

/// SQLite-backed implementation of both storage traits.
///
/// A single connection behind a mutex keeps every budget debit a
/// single-writer critical section; the debit itself additionally runs in an
/// immediate transaction so a second process on the same database file
/// cannot interleave with the read-then-conditional-write.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = open_store_connection(path)?;
        initialize_store_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| anyhow!("sqlite store lock poisoned"))
    }
}

fn open_store_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory {}", parent.display()))?;
        }
    }
    let connection = Connection::open(path)
        .with_context(|| format!("failed to open sqlite store {}", path.display()))?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

fn initialize_store_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS campaigns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            artist_address TEXT NOT NULL,
            song_title TEXT NOT NULL,
            song_url TEXT NOT NULL,
            total_amount REAL NOT NULL,
            rate_per_second REAL NOT NULL,
            remaining_amount REAL NOT NULL,
            created_unix_ms INTEGER NOT NULL,
            status TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS listening_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id INTEGER NOT NULL,
            listener_address TEXT NOT NULL,
            start_unix_ms INTEGER NOT NULL,
            end_unix_ms INTEGER NULL,
            total_seconds INTEGER NULL,
            earned_amount REAL NULL
        );
        CREATE INDEX IF NOT EXISTS idx_listening_sessions_listener
            ON listening_sessions(listener_address);
        CREATE TABLE IF NOT EXISTS listener_ledger (
            campaign_id INTEGER NOT NULL,
            listener_address TEXT NOT NULL,
            seconds_listened INTEGER NOT NULL,
            amount_earned REAL NOT NULL,
            last_payment_unix_ms INTEGER NOT NULL,
            PRIMARY KEY (campaign_id, listener_address)
        );
        "#,
    )?;
    Ok(())
}

fn campaign_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Campaign, String)> {
    let status_raw: String = row.get(8)?;
    Ok((
        Campaign {
            id: row.get(0)?,
            artist_address: row.get(1)?,
            song_title: row.get(2)?,
            song_url: row.get(3)?,
            total_amount: row.get(4)?,
            rate_per_second: row.get(5)?,
            remaining_amount: row.get(6)?,
            created_unix_ms: row.get(7)?,
            status: CampaignStatus::Unpaid,
        },
        status_raw,
    ))
}

fn decode_campaign(row: &rusqlite::Row<'_>) -> Result<Campaign> {
    let (mut campaign, status_raw) = campaign_from_row(row)?;
    campaign.status = CampaignStatus::parse(&status_raw)?;
    Ok(campaign)
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ListeningSession> {
    Ok(ListeningSession {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        listener_address: row.get(2)?,
        start_unix_ms: row.get(3)?,
        end_unix_ms: row.get(4)?,
        total_seconds: row.get(5)?,
        earned_amount: row.get(6)?,
    })
}

fn ledger_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ListenerLedgerEntry> {
    Ok(ListenerLedgerEntry {
        campaign_id: row.get(0)?,
        listener_address: row.get(1)?,
        seconds_listened: row.get(2)?,
        amount_earned: row.get(3)?,
        last_payment_unix_ms: row.get(4)?,
    })
}

const CAMPAIGN_COLUMNS: &str = "id, artist_address, song_title, song_url, total_amount, \
     rate_per_second, remaining_amount, created_unix_ms, status";
const SESSION_COLUMNS: &str =
    "id, campaign_id, listener_address, start_unix_ms, end_unix_ms, total_seconds, earned_amount";

impl CampaignStore for SqliteStore {
    fn create_campaign(&self, new: NewCampaign) -> Result<Campaign> {
        let connection = self.lock()?;
        let created_unix_ms = rill_core::current_unix_timestamp_ms();
        connection.execute(
            r#"
            INSERT INTO campaigns (artist_address, song_title, song_url, total_amount,
                rate_per_second, remaining_amount, created_unix_ms, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                new.artist_address,
                new.song_title,
                new.song_url,
                new.total_amount,
                new.rate_per_second,
                new.total_amount,
                created_unix_ms,
                CampaignStatus::Unpaid.as_str(),
            ],
        )?;
        let id = u64::try_from(connection.last_insert_rowid())
            .context("campaign rowid out of range")?;
        Ok(Campaign {
            id,
            artist_address: new.artist_address,
            song_title: new.song_title,
            song_url: new.song_url,
            total_amount: new.total_amount,
            rate_per_second: new.rate_per_second,
            remaining_amount: new.total_amount,
            created_unix_ms,
            status: CampaignStatus::Unpaid,
        })
    }

    fn campaign(&self, id: u64) -> Result<Option<Campaign>> {
        let connection = self.lock()?;
        let row = connection
            .query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id],
                decode_campaign_row,
            )
            .optional()?;
        row.transpose()
    }

    fn campaigns(&self) -> Result<Vec<Campaign>> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(&format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY id ASC"))?;
        let mut rows = statement.query([])?;
        let mut campaigns = Vec::new();
        while let Some(row) = rows.next()? {
            campaigns.push(decode_campaign(row)?);
        }
        Ok(campaigns)
    }

    fn paid_campaign(&self, id: u64) -> Result<Option<Campaign>> {
        let connection = self.lock()?;
        let row = connection
            .query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1 AND status = ?2"),
                params![id, CampaignStatus::Paid.as_str()],
                decode_campaign_row,
            )
            .optional()?;
        row.transpose()
    }

    fn mark_paid(&self, id: u64) -> Result<Campaign> {
        let connection = self.lock()?;
        let changed = connection.execute(
            "UPDATE campaigns SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![
                CampaignStatus::Paid.as_str(),
                id,
                CampaignStatus::Unpaid.as_str()
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("campaign {id} not found or not in unpaid status");
        }
        let campaign = connection
            .query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id],
                decode_campaign_row,
            )
            .optional()?
            .transpose()?;
        campaign.ok_or_else(|| anyhow!("campaign {id} disappeared after activation"))
    }

    fn debit_remaining(&self, id: u64, requested: f64) -> Result<CampaignDebit> {
        let mut connection = self.lock()?;
        let transaction =
            connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let remaining_before: f64 = transaction
            .query_row(
                "SELECT remaining_amount FROM campaigns WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| anyhow!("campaign {id} not found for budget debit"))?;

        let applied = requested.max(0.0).min(remaining_before.max(0.0));
        let remaining = remaining_before - applied;
        let completed = remaining <= 0.0;
        if completed {
            transaction.execute(
                "UPDATE campaigns SET remaining_amount = ?1, status = ?2 WHERE id = ?3",
                params![remaining, CampaignStatus::Completed.as_str(), id],
            )?;
        } else {
            transaction.execute(
                "UPDATE campaigns SET remaining_amount = ?1 WHERE id = ?2",
                params![remaining, id],
            )?;
        }
        transaction.commit()?;
        Ok(CampaignDebit {
            applied,
            remaining,
            completed,
        })
    }
}

fn decode_campaign_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Campaign>> {
    Ok(decode_campaign(row))
}

impl SessionStore for SqliteStore {
    fn create_session(
        &self,
        campaign_id: u64,
        listener_address: &str,
        start_unix_ms: u64,
    ) -> Result<ListeningSession> {
        let connection = self.lock()?;
        connection.execute(
            r#"
            INSERT INTO listening_sessions (campaign_id, listener_address, start_unix_ms)
            VALUES (?1, ?2, ?3)
            "#,
            params![campaign_id, listener_address, start_unix_ms],
        )?;
        let id = u64::try_from(connection.last_insert_rowid())
            .context("listening session rowid out of range")?;
        Ok(ListeningSession {
            id,
            campaign_id,
            listener_address: listener_address.to_string(),
            start_unix_ms,
            end_unix_ms: None,
            total_seconds: None,
            earned_amount: None,
        })
    }

    fn session(&self, id: u64) -> Result<Option<ListeningSession>> {
        let connection = self.lock()?;
        Ok(connection
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM listening_sessions WHERE id = ?1"),
                params![id],
                session_from_row,
            )
            .optional()?)
    }

    fn open_session_for_listener(
        &self,
        listener_address: &str,
    ) -> Result<Option<ListeningSession>> {
        let connection = self.lock()?;
        Ok(connection
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM listening_sessions \
                     WHERE listener_address = ?1 AND end_unix_ms IS NULL"
                ),
                params![listener_address],
                session_from_row,
            )
            .optional()?)
    }

    fn open_session(
        &self,
        campaign_id: u64,
        listener_address: &str,
    ) -> Result<Option<ListeningSession>> {
        let connection = self.lock()?;
        Ok(connection
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM listening_sessions \
                     WHERE campaign_id = ?1 AND listener_address = ?2 AND end_unix_ms IS NULL"
                ),
                params![campaign_id, listener_address],
                session_from_row,
            )
            .optional()?)
    }

    fn close_open_session(&self, id: u64, end_unix_ms: u64, total_seconds: u64) -> Result<bool> {
        let connection = self.lock()?;
        let changed = connection.execute(
            r#"
            UPDATE listening_sessions
            SET end_unix_ms = ?1, total_seconds = ?2
            WHERE id = ?3 AND end_unix_ms IS NULL
            "#,
            params![end_unix_ms, total_seconds, id],
        )?;
        Ok(changed == 1)
    }

    fn record_session_earnings(&self, id: u64, earned_amount: f64) -> Result<()> {
        let connection = self.lock()?;
        let changed = connection.execute(
            "UPDATE listening_sessions SET earned_amount = ?1 WHERE id = ?2",
            params![earned_amount, id],
        )?;
        if changed == 0 {
            anyhow::bail!("listening session {id} not found while recording earnings");
        }
        Ok(())
    }

    fn closed_sessions_for_listener(
        &self,
        listener_address: &str,
    ) -> Result<Vec<ListeningSession>> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM listening_sessions \
             WHERE listener_address = ?1 AND end_unix_ms IS NOT NULL \
             ORDER BY start_unix_ms DESC"
        ))?;
        let mut rows = statement.query(params![listener_address])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(session_from_row(row)?);
        }
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
        let connection = self.lock()?;
        connection.execute(
            r#"
            INSERT INTO listener_ledger (campaign_id, listener_address, seconds_listened,
                amount_earned, last_payment_unix_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(campaign_id, listener_address) DO UPDATE SET
                seconds_listened = seconds_listened + excluded.seconds_listened,
                amount_earned = amount_earned + excluded.amount_earned,
                last_payment_unix_ms = excluded.last_payment_unix_ms
            "#,
            params![campaign_id, listener_address, seconds, amount, paid_unix_ms],
        )?;
        let entry = connection.query_row(
            "SELECT campaign_id, listener_address, seconds_listened, amount_earned, \
             last_payment_unix_ms FROM listener_ledger \
             WHERE campaign_id = ?1 AND listener_address = ?2",
            params![campaign_id, listener_address],
            ledger_from_row,
        )?;
        Ok(entry)
    }

    fn ledger_entry(
        &self,
        campaign_id: u64,
        listener_address: &str,
    ) -> Result<Option<ListenerLedgerEntry>> {
        let connection = self.lock()?;
        Ok(connection
            .query_row(
                "SELECT campaign_id, listener_address, seconds_listened, amount_earned, \
                 last_payment_unix_ms FROM listener_ledger \
                 WHERE campaign_id = ?1 AND listener_address = ?2",
                params![campaign_id, listener_address],
                ledger_from_row,
            )
            .optional()?)
    }
}
