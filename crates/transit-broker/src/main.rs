//! `Transit` Broker
//!
//! Runs one session through the broker against the in-process loopback
//! engine: create, datagram round trip, bidirectional echo, close.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use bytes::Bytes;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use transit_broker::{
    BrokerConfig, ControlChannel, CreateSessionRequest, CreateSessionResponse, LoopbackEngine,
    Notification, PendingResolver, Principal, SessionBroker, SessionOptions,
};
use transit_core::config::{self, Config};

#[derive(Parser, Debug)]
#[command(name = "transit-broker")]
#[command(version, about = "Transit session broker - loopback session demo")]
struct Args {
    /// Session target (URL or bare host)
    #[arg(long, default_value = "loopback", env = "TRANSIT_TARGET")]
    target: String,

    /// Origin of the requesting principal
    #[arg(long, default_value = "", env = "TRANSIT_ORIGIN")]
    origin: String,

    /// Explicit settings file (skips global/project lookup)
    #[arg(long, env = "TRANSIT_CONFIG")]
    config: Option<PathBuf>,

    /// Project directory searched for `.transit/settings.json`
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Payload echoed over a bidirectional stream
    #[arg(long, default_value = "hello over transit")]
    message: String,

    /// Payload sent as a datagram
    #[arg(long, default_value = "ping")]
    datagram: String,

    /// Application close code
    #[arg(long, default_value_t = 0)]
    close_code: u32,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "TRANSIT_LOG_JSON")]
    log_json: bool,
}

const WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;
    transit_core::tracing_init::init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %args.target,
        "Starting transit-broker"
    );

    let broker = SessionBroker::new(
        BrokerConfig::from(&config.broker),
        Box::new(LoopbackEngine::new()),
    );
    let (control, mut notifications) = ControlChannel::new();

    let (resolver, created) = PendingResolver::channel("create session");
    broker.create_session(
        CreateSessionRequest {
            url: args.target.clone(),
            principal: Principal::new(args.origin.clone()),
            options: SessionOptions {
                client_info: Some(format!("transit-broker/{}", env!("CARGO_PKG_VERSION"))),
                ..SessionOptions::default()
            },
            control,
        },
        resolver,
    );
    let response = CreateSessionResponse::from(created.await?);
    if let Err(e) = response.result {
        bail!("session creation failed: {e}");
    }
    info!(reliability = ?response.reliability, "Session established");

    datagram_round_trip(&broker, &mut notifications, args.datagram.into_bytes()).await?;
    let echoed = stream_echo(&broker, args.message.as_bytes()).await?;
    info!(echoed = %String::from_utf8_lossy(&echoed), "Bidirectional echo complete");

    broker.close(args.close_code, "demo complete")?;
    let stats = broker.stats();
    info!(
        state = %stats.state,
        streams_out = stats.streams_opened_outbound,
        datagrams_sent = stats.datagrams_sent,
        datagrams_received = stats.datagrams_received,
        "Session finished"
    );
    broker.shutdown();
    Ok(())
}

fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => config::load_config(args.project_dir.as_deref())?,
    };
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    if args.log_json {
        config.logging.json = true;
    }
    Ok(config)
}

async fn datagram_round_trip(
    broker: &SessionBroker,
    notifications: &mut mpsc::UnboundedReceiver<Notification>,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    let (resolver, sent) = PendingResolver::channel("datagram");
    broker.send_datagram(Bytes::from(payload), None, resolver);
    sent.await??;
    if let Some(size) = broker.max_datagram_size() {
        info!(max_size = size, "Datagram sent");
    }

    let received = tokio::time::timeout(WAIT, async {
        while let Some(notification) = notifications.recv().await {
            match notification {
                Notification::IncomingDatagram { payload, .. } => return Some(payload),
                other => warn!(notification = other.name(), "Unexpected notification"),
            }
        }
        None
    })
    .await
    .context("waiting for datagram echo")?;

    match received {
        Some(payload) => {
            info!(len = payload.len(), "Datagram echoed");
            Ok(())
        }
        None => bail!("control channel closed before datagram echo"),
    }
}

async fn stream_echo(broker: &SessionBroker, message: &[u8]) -> anyhow::Result<Vec<u8>> {
    let (resolver, opened) = PendingResolver::channel("bidirectional stream");
    broker.create_bidirectional_stream(None, resolver);
    let mut pipes = opened.await??;

    pipes.sender.write_all(message).await?;
    pipes.sender.shutdown().await?;
    drop(pipes.sender);

    let mut echoed = Vec::new();
    tokio::time::timeout(WAIT, pipes.receiver.read_to_end(&mut echoed))
        .await
        .context("waiting for stream echo")??;
    Ok(echoed)
}
