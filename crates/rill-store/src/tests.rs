use super::*;
use crate::{MemoryStore, SqliteStore};

fn sample_campaign() -> NewCampaign {
    NewCampaign {
        artist_address: "rArtist111".to_string(),
        song_title: "Night Drive".to_string(),
        song_url: "https://cdn.example/night-drive.mp3".to_string(),
        total_amount: 1.0,
        rate_per_second: 0.01,
    }
}

fn exercise_campaign_lifecycle<S: CampaignStore>(store: &S) {
    let campaign = store.create_campaign(sample_campaign()).expect("create");
    assert_eq!(campaign.status, CampaignStatus::Unpaid);
    assert_eq!(campaign.remaining_amount, campaign.total_amount);

    assert!(store
        .paid_campaign(campaign.id)
        .expect("paid lookup")
        .is_none());

    let paid = store.mark_paid(campaign.id).expect("mark paid");
    assert_eq!(paid.status, CampaignStatus::Paid);
    assert!(store
        .paid_campaign(campaign.id)
        .expect("paid lookup")
        .is_some());
    assert!(store.mark_paid(campaign.id).is_err());

    let debit = store.debit_remaining(campaign.id, 0.4).expect("debit");
    assert_eq!(debit.applied, 0.4);
    assert!((debit.remaining - 0.6).abs() < 1e-9);
    assert!(!debit.completed);

    // Over-requesting clamps to what was remaining and completes the campaign.
    let debit = store.debit_remaining(campaign.id, 5.0).expect("debit");
    assert!((debit.applied - 0.6).abs() < 1e-9);
    assert_eq!(debit.remaining, 0.0);
    assert!(debit.completed);
    let reloaded = store
        .campaign(campaign.id)
        .expect("lookup")
        .expect("campaign exists");
    assert_eq!(reloaded.status, CampaignStatus::Completed);

    let debit = store.debit_remaining(campaign.id, 1.0).expect("debit");
    assert_eq!(debit.applied, 0.0);
}

fn exercise_session_lifecycle<S: SessionStore>(store: &S) {
    let session = store
        .create_session(7, "rListener1", 10_000)
        .expect("create session");
    assert!(session.is_open());

    let open = store
        .open_session_for_listener("rListener1")
        .expect("open lookup")
        .expect("open session");
    assert_eq!(open.id, session.id);
    assert!(store
        .open_session(7, "rListener1")
        .expect("open lookup")
        .is_some());
    assert!(store
        .open_session(8, "rListener1")
        .expect("open lookup")
        .is_none());

    assert!(store
        .close_open_session(session.id, 15_000, 5)
        .expect("close"));
    // Second close is the idempotence guard.
    assert!(!store
        .close_open_session(session.id, 16_000, 6)
        .expect("close again"));
    store
        .record_session_earnings(session.id, 0.05)
        .expect("record earnings");

    let closed = store
        .session(session.id)
        .expect("lookup")
        .expect("session exists");
    assert_eq!(closed.end_unix_ms, Some(15_000));
    assert_eq!(closed.total_seconds, Some(5));
    assert_eq!(closed.earned_amount, Some(0.05));
    assert!(store
        .open_session_for_listener("rListener1")
        .expect("open lookup")
        .is_none());

    let history = store
        .closed_sessions_for_listener("rListener1")
        .expect("history");
    assert_eq!(history.len(), 1);
}

fn exercise_ledger_accumulation<S: SessionStore>(store: &S) {
    let first = store
        .record_ledger_tick(3, "rListener2", 1, 0.01, 1_000)
        .expect("tick");
    assert_eq!(first.seconds_listened, 1);
    let second = store
        .record_ledger_tick(3, "rListener2", 2, 0.02, 2_000)
        .expect("tick");
    assert_eq!(second.seconds_listened, 3);
    assert!((second.amount_earned - 0.03).abs() < 1e-9);
    assert_eq!(second.last_payment_unix_ms, 2_000);

    let entry = store
        .ledger_entry(3, "rListener2")
        .expect("lookup")
        .expect("entry exists");
    assert_eq!(entry.seconds_listened, 3);
    assert!(store.ledger_entry(4, "rListener2").expect("lookup").is_none());
}

#[test]
fn unit_memory_store_campaign_lifecycle() {
    exercise_campaign_lifecycle(&MemoryStore::new());
}

#[test]
fn unit_memory_store_session_lifecycle() {
    exercise_session_lifecycle(&MemoryStore::new());
}

#[test]
fn unit_memory_store_ledger_accumulates_across_ticks() {
    exercise_ledger_accumulation(&MemoryStore::new());
}

#[test]
fn functional_sqlite_store_campaign_lifecycle() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::open(&tempdir.path().join("rill.db")).expect("open");
    exercise_campaign_lifecycle(&store);
}

#[test]
fn functional_sqlite_store_session_lifecycle() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::open(&tempdir.path().join("rill.db")).expect("open");
    exercise_session_lifecycle(&store);
}

#[test]
fn functional_sqlite_store_ledger_accumulates_across_ticks() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::open(&tempdir.path().join("rill.db")).expect("open");
    exercise_ledger_accumulation(&store);
}

#[test]
fn functional_sqlite_store_reopens_existing_database() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let path = tempdir.path().join("rill.db");
    let campaign_id = {
        let store = SqliteStore::open(&path).expect("open");
        let campaign = store.create_campaign(sample_campaign()).expect("create");
        store.mark_paid(campaign.id).expect("mark paid");
        campaign.id
    };
    let store = SqliteStore::open(&path).expect("reopen");
    let campaign = store
        .campaign(campaign_id)
        .expect("lookup")
        .expect("campaign persisted");
    assert_eq!(campaign.status, CampaignStatus::Paid);
}

#[test]
fn regression_concurrent_debits_never_overdraw() {
    let store = std::sync::Arc::new(MemoryStore::new());
    let campaign = store.create_campaign(sample_campaign()).expect("create");
    store.mark_paid(campaign.id).expect("mark paid");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = std::sync::Arc::clone(&store);
        let id = campaign.id;
        handles.push(std::thread::spawn(move || {
            store.debit_remaining(id, 0.3).expect("debit").applied
        }));
    }
    let total_applied: f64 = handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .sum();
    assert!((total_applied - campaign.total_amount).abs() < 1e-9);
    let final_campaign = store
        .campaign(campaign.id)
        .expect("lookup")
        .expect("campaign exists");
    assert_eq!(final_campaign.status, CampaignStatus::Completed);
    assert!(final_campaign.remaining_amount >= 0.0);
}
