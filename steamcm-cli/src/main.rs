//! steamcm-cli — connect to a Steam Connection Manager and hold the line.
//!
//! Picks a server (fastest by default), completes the encryption handshake,
//! starts the heartbeat loop, and prints every message it receives until
//! interrupted.
//!
//! # Run
//! ```
//! cargo run -p steamcm-cli
//! ```

use std::time::Duration;

use clap::Parser;
use steamcm::core::{AutoSleep, Config, Session};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Steam Connection Manager demo client
#[derive(Parser, Debug)]
#[command(name = "steamcm-cli")]
#[command(about = "Connect to a Steam Connection Manager and hold the line")]
#[command(version)]
struct Args {
    /// Probe the server list and connect to the lowest-latency endpoint
    #[arg(long, default_value_t = true)]
    use_fastest: bool,

    /// Override the CM directory URL
    #[arg(long)]
    cm_list_url: Option<String>,

    /// Interval between heartbeats, in seconds
    #[arg(long, default_value_t = 30)]
    heartbeat_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = Config::default();
    if let Some(url) = args.cm_list_url {
        config.cm_list_url = url;
    }

    let session = Session::new(config);

    session
        .on(steamcm::proto::message_id::CLIENT_LOG_ON_RESPONSE, |packet| {
            tracing::info!(message_id = packet.message_id, "received ClientLogOnResponse");
        })
        .await;

    tracing::info!("connecting…");
    session.connect(&AutoSleep::default(), args.use_fastest).await?;
    tracing::info!("connected, session_id={}", session.session_id());

    let heartbeat = tokio::spawn(steamcm::core::service::run_heartbeat(
        session.clone(),
        Duration::from_secs(args.heartbeat_secs),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down…");
    session.disconnect().await;
    heartbeat.abort();

    Ok(())
}
