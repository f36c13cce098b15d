//! In-memory registry of live listening connections.
//!
//! Explicit and injectable rather than ambient process state; entries live
//! only as long as the socket. Reconnection backoff survives disconnects so
//! a flapping client backs off progressively.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};

const MAX_RECONNECT_DELAY_SECONDS: u64 = 30;

/// Synthesized connection key for one (listener, campaign) pair.
pub fn client_id(listener_address: &str, campaign_id: u64) -> String {
    format!("{listener_address}_{campaign_id}")
}

#[derive(Debug, Clone)]
struct ConnectionEntry {
    connected_unix_ms: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<String, ConnectionEntry>,
    reconnect_delays: HashMap<String, u64>,
}

/// Registry of live connections plus per-client reconnection delays.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("connection registry lock poisoned"))
    }

    /// Registers a live connection and resets its reconnection delay.
    pub fn register(&self, client_id: &str, connected_unix_ms: u64) -> Result<()> {
        let mut state = self.lock()?;
        state.connections.insert(
            client_id.to_string(),
            ConnectionEntry { connected_unix_ms },
        );
        state.reconnect_delays.insert(client_id.to_string(), 0);
        tracing::info!(client_id, "listening connection registered");
        Ok(())
    }

    /// Removes a connection entry; the backoff counter survives so the next
    /// reconnect attempt is still delayed.
    pub fn remove(&self, client_id: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.connections.remove(client_id).is_some() {
            tracing::info!(client_id, "listening connection removed");
        }
        Ok(())
    }

    pub fn contains(&self, client_id: &str) -> Result<bool> {
        Ok(self.lock()?.connections.contains_key(client_id))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.connections.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn connected_since(&self, client_id: &str) -> Result<Option<u64>> {
        Ok(self
            .lock()?
            .connections
            .get(client_id)
            .map(|entry| entry.connected_unix_ms))
    }

    /// Advances and returns the exponential reconnection delay for a client:
    /// 1s on the first retry, then `min(30, (previous + 1) * 2)`.
    pub fn next_reconnection_delay_seconds(&self, client_id: &str) -> Result<u64> {
        let mut state = self.lock()?;
        let current = state.reconnect_delays.get(client_id).copied().unwrap_or(0);
        let next = if current == 0 {
            1
        } else {
            MAX_RECONNECT_DELAY_SECONDS.min((current + 1) * 2)
        };
        state.reconnect_delays.insert(client_id.to_string(), next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_client_id_joins_listener_and_campaign() {
        assert_eq!(client_id("rListener1", 7), "rListener1_7");
    }

    #[test]
    fn unit_register_and_remove_round_trip() {
        let registry = ConnectionRegistry::new();
        registry.register("a_1", 1_000).expect("register");
        assert!(registry.contains("a_1").expect("contains"));
        assert_eq!(registry.connected_since("a_1").expect("since"), Some(1_000));
        registry.remove("a_1").expect("remove");
        assert!(!registry.contains("a_1").expect("contains"));
        assert!(registry.is_empty().expect("empty"));
    }

    #[test]
    fn unit_reconnection_delay_backs_off_and_caps() {
        let registry = ConnectionRegistry::new();
        let delays: Vec<u64> = (0..6)
            .map(|_| {
                registry
                    .next_reconnection_delay_seconds("a_1")
                    .expect("delay")
            })
            .collect();
        assert_eq!(delays, vec![1, 4, 10, 22, 30, 30]);
    }

    #[test]
    fn unit_register_resets_reconnection_delay() {
        let registry = ConnectionRegistry::new();
        registry
            .next_reconnection_delay_seconds("a_1")
            .expect("delay");
        registry
            .next_reconnection_delay_seconds("a_1")
            .expect("delay");
        registry.register("a_1", 1_000).expect("register");
        assert_eq!(
            registry
                .next_reconnection_delay_seconds("a_1")
                .expect("delay"),
            1
        );
    }
}
