//! End-to-end metering and settlement flows against the SQLite store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rill_engine::{
    run_listening_session, ConnectionRegistry, ListenerSink, ListenerStream, NoopPaymentGateway,
    SessionConfig, SessionDeps, SettlementFinalizer, TerminationReason,
};
use rill_store::{CampaignStatus, CampaignStore, NewCampaign, SessionStore, SqliteStore};
use tokio::sync::mpsc;

const LISTENER: &str = "rListenerIntegration";

struct ScriptedStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl ListenerStream for ScriptedStream {
    async fn next_text(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }
}

#[derive(Default)]
struct DiscardSink;

#[async_trait]
impl ListenerSink for DiscardSink {
    async fn send_text(&self, _text: String) -> Result<()> {
        Ok(())
    }

    async fn close(&self, _code: u16) -> Result<()> {
        Ok(())
    }
}

fn heartbeat(position: f64) -> String {
    format!(
        r#"{{"type":"heartbeat","is_playing":true,"volume":50.0,"current_time":{position}}}"#
    )
}

struct Setup {
    _dir: tempfile::TempDir,
    store: Arc<SqliteStore>,
    deps: SessionDeps,
    campaign_id: u64,
}

fn setup_paid_campaign(total_amount: f64, rate_per_second: f64) -> Setup {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SqliteStore::open(&dir.path().join("rill.db3")).expect("open store"));
    let campaign = store
        .create_campaign(NewCampaign {
            artist_address: "rArtistIntegration".to_string(),
            song_title: "Integration Song".to_string(),
            song_url: "https://example.com/integration.mp3".to_string(),
            total_amount,
            rate_per_second,
        })
        .expect("create campaign");
    store.mark_paid(campaign.id).expect("mark paid");
    let deps = SessionDeps {
        campaigns: Arc::clone(&store) as Arc<dyn CampaignStore>,
        sessions: Arc::clone(&store) as Arc<dyn SessionStore>,
        payments: Arc::new(NoopPaymentGateway),
        registry: Arc::new(ConnectionRegistry::new()),
    };
    Setup {
        _dir: dir,
        store,
        deps,
        campaign_id: campaign.id,
    }
}

#[tokio::test]
async fn integration_heartbeat_session_settles_elapsed_time_against_budget() {
    let setup = setup_paid_campaign(1.0, 0.01);
    let session = setup
        .store
        .create_session(
            setup.campaign_id,
            LISTENER,
            rill_core::current_unix_timestamp_ms(),
        )
        .expect("create session");

    let (tx, rx) = mpsc::unbounded_channel();
    let stream = ScriptedStream { rx };
    let running = tokio::spawn({
        let deps = setup.deps.clone();
        let campaign_id = setup.campaign_id;
        async move {
            run_listening_session(
                &deps,
                &SessionConfig::default(),
                campaign_id,
                LISTENER,
                stream,
                Arc::new(DiscardSink),
            )
            .await
        }
    });

    for tick in 1..=5_u32 {
        tx.send(heartbeat(f64::from(tick) * 0.2)).expect("send heartbeat");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    drop(tx);
    let outcome = running
        .await
        .expect("session task")
        .expect("session outcome");

    assert_eq!(outcome.reason, TerminationReason::ClientDisconnect);
    assert!(outcome.settlement.earned_amount > 0.0);
    // Roughly one second of listening at 0.01/s, well under the budget.
    assert!(outcome.settlement.earned_amount < 0.05);

    let settled = setup
        .store
        .session(session.id)
        .expect("load session")
        .expect("session exists");
    assert!(!settled.is_open());
    assert_eq!(settled.earned_amount, Some(outcome.settlement.earned_amount));

    let campaign = setup
        .store
        .campaign(setup.campaign_id)
        .expect("load campaign")
        .expect("campaign exists");
    assert!((campaign.remaining_amount - (1.0 - outcome.settlement.earned_amount)).abs() < 1e-9);
    assert_eq!(campaign.status, CampaignStatus::Paid);
}

#[tokio::test]
async fn integration_settlement_is_capped_by_budget_and_completes_campaign() {
    let setup = setup_paid_campaign(0.03, 0.01);
    let start_unix_ms = rill_core::current_unix_timestamp_ms();
    let session = setup
        .store
        .create_session(setup.campaign_id, LISTENER, start_unix_ms)
        .expect("create session");

    // Ten seconds of listening would earn 0.10 against a 0.03 budget.
    let mut finalizer = SettlementFinalizer::new(
        Arc::clone(&setup.deps.campaigns),
        Arc::clone(&setup.deps.sessions),
        session.id,
        setup.campaign_id,
        0.01,
        start_unix_ms,
    );
    let settlement = finalizer
        .finalize(start_unix_ms + 10_000, "client_disconnect")
        .expect("finalize");

    assert!((settlement.earned_amount - 0.03).abs() < 1e-9);
    assert!(settlement.campaign_completed);

    let campaign = setup
        .store
        .campaign(setup.campaign_id)
        .expect("load campaign")
        .expect("campaign exists");
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert!(campaign.remaining_amount.abs() < 1e-9);
}

#[tokio::test]
async fn integration_concurrent_settlements_never_overdraw_budget() {
    let setup = setup_paid_campaign(0.05, 0.01);
    let start_unix_ms = rill_core::current_unix_timestamp_ms();

    // Two listeners each ran long enough to claim 0.04; only 0.05 exists.
    let mut tasks = Vec::new();
    for listener in ["rListenerOne", "rListenerTwo"] {
        let session = setup
            .store
            .create_session(setup.campaign_id, listener, start_unix_ms)
            .expect("create session");
        let campaigns = Arc::clone(&setup.deps.campaigns);
        let sessions = Arc::clone(&setup.deps.sessions);
        let campaign_id = setup.campaign_id;
        tasks.push(tokio::task::spawn_blocking(move || {
            let mut finalizer = SettlementFinalizer::new(
                campaigns,
                sessions,
                session.id,
                campaign_id,
                0.01,
                start_unix_ms,
            );
            finalizer.finalize(start_unix_ms + 4_000, "client_disconnect")
        }));
    }

    let mut total_earned = 0.0;
    for task in tasks {
        let settlement = task.await.expect("join").expect("finalize");
        total_earned += settlement.earned_amount;
    }
    assert!((total_earned - 0.05).abs() < 1e-9);

    let campaign = setup
        .store
        .campaign(setup.campaign_id)
        .expect("load campaign")
        .expect("campaign exists");
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert!(campaign.remaining_amount.abs() < 1e-9);
}

#[tokio::test]
async fn integration_listener_history_accumulates_across_sessions() {
    let setup = setup_paid_campaign(1.0, 0.01);

    for _ in 0..2 {
        let session = setup
            .store
            .create_session(
                setup.campaign_id,
                LISTENER,
                rill_core::current_unix_timestamp_ms(),
            )
            .expect("create session");

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(heartbeat(1.0)).expect("send heartbeat");
        drop(tx);
        let outcome = run_listening_session(
            &setup.deps,
            &SessionConfig::default(),
            setup.campaign_id,
            LISTENER,
            ScriptedStream { rx },
            Arc::new(DiscardSink),
        )
        .await
        .expect("session outcome");
        assert_eq!(outcome.reason, TerminationReason::ClientDisconnect);

        let settled = setup
            .store
            .session(session.id)
            .expect("load session")
            .expect("session exists");
        assert!(!settled.is_open());
    }

    let history = setup
        .store
        .closed_sessions_for_listener(LISTENER)
        .expect("history");
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|session| !session.is_open()));
}
