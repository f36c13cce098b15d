use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use rill_engine::{MeteringPolicy, NoopPaymentGateway, SessionConfig};
use rill_gateway::{run_gateway_server, GatewayState};
use rill_store::{CampaignStore, MemoryStore, SessionStore, SqliteStore};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliStoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliMeteringPolicy {
    SettleAtEnd,
    Continuous,
}

impl From<CliMeteringPolicy> for MeteringPolicy {
    fn from(policy: CliMeteringPolicy) -> Self {
        match policy {
            CliMeteringPolicy::SettleAtEnd => Self::SettleAtEnd,
            CliMeteringPolicy::Continuous => Self::Continuous,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "rill",
    about = "Pay-per-listen streaming gateway with metered listening sessions",
    version
)]
struct Cli {
    #[arg(
        long,
        env = "RILL_BIND",
        default_value = "127.0.0.1:8080",
        help = "Socket address for the HTTP/WebSocket gateway"
    )]
    bind: String,

    #[arg(
        long,
        env = "RILL_STORE",
        value_enum,
        default_value = "sqlite",
        help = "Persistence backend"
    )]
    store: CliStoreBackend,

    #[arg(
        long,
        env = "RILL_DB",
        default_value = ".rill/rill.db3",
        help = "SQLite database path (sqlite backend only)"
    )]
    db: PathBuf,

    #[arg(
        long,
        env = "RILL_KEEPALIVE_INTERVAL_SECONDS",
        default_value_t = 30,
        help = "Seconds between liveness pings sent to each listener"
    )]
    keepalive_interval_seconds: u64,

    #[arg(
        long,
        env = "RILL_METERING_POLICY",
        value_enum,
        default_value = "settle-at-end",
        help = "Pay listeners once at session end, or continuously per heartbeat"
    )]
    metering_policy: CliMeteringPolicy,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let (campaigns, sessions): (Arc<dyn CampaignStore>, Arc<dyn SessionStore>) = match cli.store {
        CliStoreBackend::Sqlite => {
            let store = Arc::new(SqliteStore::open(&cli.db)?);
            (
                Arc::clone(&store) as Arc<dyn CampaignStore>,
                store as Arc<dyn SessionStore>,
            )
        }
        CliStoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            (
                Arc::clone(&store) as Arc<dyn CampaignStore>,
                store as Arc<dyn SessionStore>,
            )
        }
    };

    let session_config = SessionConfig {
        keepalive_interval: Duration::from_secs(cli.keepalive_interval_seconds.max(1)),
        metering_policy: cli.metering_policy.into(),
    };
    let state = Arc::new(GatewayState::new(
        campaigns,
        sessions,
        Arc::new(NoopPaymentGateway),
        session_config,
    ));

    run_gateway_server(&cli.bind, state).await
}
