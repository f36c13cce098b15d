//! Keepalive supervisor: the sibling task that probes a connection's
//! liveness while the receive loop waits for heartbeats.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::transport::ListenerSink;

/// Handle owning the supervisor task. `shutdown` must be awaited during
/// session teardown so no probe races the final close.
#[derive(Debug)]
pub struct KeepaliveSupervisor {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl KeepaliveSupervisor {
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Cancels the supervisor and waits for the task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Spawns the per-connection keepalive task. Every `interval` it sends the
/// ping probe; if the send fails it reports the failure on `failure_tx` and
/// exits. It never touches session or campaign state.
pub fn start_keepalive_supervisor(
    sink: Arc<dyn ListenerSink>,
    interval: Duration,
    failure_tx: mpsc::Sender<String>,
) -> Result<KeepaliveSupervisor> {
    if interval.is_zero() {
        anyhow::bail!("keepalive interval must be greater than zero");
    }
    let handle = tokio::runtime::Handle::try_current()
        .context("keepalive supervisor requires an active Tokio runtime")?;

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let task = handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Consume the immediate first tick so the first probe waits a full
        // interval, matching the receive loop's view of a fresh connection.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = sink
                        .send_text(rill_protocol::PING_FRAME.to_string())
                        .await
                    {
                        tracing::warn!(%error, "keepalive probe failed");
                        let _ = failure_tx.send(error.to_string()).await;
                        break;
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
    });

    Ok(KeepaliveSupervisor {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}
