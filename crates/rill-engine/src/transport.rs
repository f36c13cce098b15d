//! Transport seams between the engine and the WebSocket layer.
//!
//! The gateway adapts a live socket to these traits; tests drive the engine
//! through channel-backed fakes.

use anyhow::Result;
use async_trait::async_trait;

/// Receiving half of a listener connection, owned by the session's single
/// receive loop.
#[async_trait]
pub trait ListenerStream: Send {
    /// The next inbound text frame. `None` means the peer closed the
    /// connection; `Some(Err(..))` is a transport-level failure.
    async fn next_text(&mut self) -> Option<Result<String>>;
}

/// Sending half of a listener connection, shared between the receive loop
/// and the keepalive supervisor.
#[async_trait]
pub trait ListenerSink: Send + Sync {
    async fn send_text(&self, text: String) -> Result<()>;

    /// Closes the connection with the given code. Reasons are logged server
    /// side only, never sent to the client.
    async fn close(&self, code: u16) -> Result<()>;
}
