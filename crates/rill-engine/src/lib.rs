//! Real-time listening-session protocol engine.
//!
//! One engine instance drives one duplex connection: it validates the
//! periodic playback heartbeat, guards against implausible progress
//! patterns, meters elapsed listening time against the campaign budget, and
//! settles the session's earnings exactly once however the session ends.

mod anomaly;
mod error;
mod keepalive;
mod metering;
mod payout;
mod registry;
mod session;
mod settlement;
mod transport;


pub use anomaly::{classify_progress, ProgressObservation, ProgressTracker, ProgressVerdict};
pub use error::{PreconditionFailure, SessionError};
pub use keepalive::{start_keepalive_supervisor, KeepaliveSupervisor};
pub use metering::{projected_earnings, settled_earnings};
pub use payout::{MicroPaymentTicker, NoopPaymentGateway, PaymentGateway, TickPayment, TransferOutcome};
pub use registry::{client_id, ConnectionRegistry};
pub use session::{
    run_listening_session, MeteringPolicy, SessionConfig, SessionDeps, SessionOutcome,
    TerminationReason,
};
pub use settlement::{Settlement, SettlementFinalizer};
pub use transport::{ListenerSink, ListenerStream};
