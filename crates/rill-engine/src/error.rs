use thiserror::Error;

/// Connect-time failures that prevent a session from ever becoming active.
/// No settlement is attempted for these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionFailure {
    #[error("campaign {0} not found or not in paid status")]
    CampaignInactive(u64),
    #[error("no open listening session for {listener_address} on campaign {campaign_id}")]
    NoActiveSession {
        campaign_id: u64,
        listener_address: String,
    },
}

/// Failures that abort a session run. Orderly terminations (disconnects,
/// pauses, anomalies) are outcomes, not errors; see the session module.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Precondition(#[from] PreconditionFailure),
    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}
