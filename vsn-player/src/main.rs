//! Voice sending node player (vsn-player) - demo entry point
//!
//! Loads the given identifiers, plays them in sequence on one guild player
//! and pulls frames through a local connection at the transport cadence.
//! Outbound controller messages are printed as JSON lines.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vsn_common::events::{NodeEvent, OutboundMessage};
use vsn_common::NodeConfig;
use vsn_player::engine::local::LocalPlayerManager;
use vsn_player::engine::{AudioTrack, LoadResult, TrackEndReason};
use vsn_player::transport::{FileSink, FrameSink, LocalConnection, NullSink};
use vsn_player::{FilterChain, SessionContext};

/// Command-line arguments for vsn-player
#[derive(Parser, Debug)]
#[command(name = "vsn-player")]
#[command(about = "Voice sending node playback core")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "VSN_CONFIG")]
    config: Option<PathBuf>,

    /// Guild id of the player
    #[arg(short, long, default_value = "0")]
    guild: String,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration_secs: Option<u64>,

    /// Write encoded frames to this file instead of discarding them
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Filter payload as JSON
    #[arg(short, long)]
    filters: Option<String>,

    /// Identifiers to load and play in order (e.g. tone:440:5000 or a path)
    #[arg(required = true)]
    identifiers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // `[logging] level` seeds the log filter below
    let config = NodeConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter_directives().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting vsn-player (update interval {}s, loss window {}s)",
        config.player_update_interval, config.loss_window_secs
    );

    let manager = Arc::new(LocalPlayerManager::new(&config));
    let mut queue: VecDeque<AudioTrack> = VecDeque::new();
    for identifier in &args.identifiers {
        match manager.load_item(identifier) {
            LoadResult::LoadFailed(exception) => warn!(
                "Failed to load {}: {}",
                identifier,
                exception.message.unwrap_or_default()
            ),
            LoadResult::NoMatches => warn!("No matches for {}", identifier),
            result => queue.extend(result.into_tracks()),
        }
    }
    if queue.is_empty() {
        anyhow::bail!("Nothing to play");
    }
    info!("Queued {} track(s)", queue.len());

    let session = SessionContext::new(manager.clone(), config.clone(), Handle::current());
    let mut messages = Box::pin(session.subscribe_stream());

    let player = session.get_player(&args.guild);
    if let Some(payload) = &args.filters {
        let chain = FilterChain::parse(payload).context("Invalid filter payload")?;
        player.set_filters(chain);
    }

    let sink: Box<dyn FrameSink> = match &args.output {
        Some(path) => Box::new(FileSink::create(path).context("Failed to open output file")?),
        None => Box::new(NullSink::default()),
    };
    let connection = LocalConnection::new(sink);
    player.provide_to(&connection);
    connection.start(&Handle::current());

    if let Some(track) = queue.pop_front() {
        player.play(track);
    }

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut stats = tokio::time::interval(config.player_update_period());
    stats.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(message) = messages.next() => {
                println!("{}", serde_json::to_string(&message)?);

                if let OutboundMessage::Event(NodeEvent::TrackEndEvent { reason, .. }) = &message {
                    if TrackEndReason::from_wire(reason).is_some_and(|r| r.may_start_next()) {
                        match queue.pop_front() {
                            Some(track) => player.play(track),
                            None => {
                                info!("Queue finished");
                                break;
                            }
                        }
                    }
                }
            }
            _ = stats.tick() => {
                let current = player.loss_counter().snapshot();
                info!(
                    "Frames sent {} lost {} ({:.1}% loss) this window",
                    current.success,
                    current.loss,
                    current.loss_ratio() * 100.0
                );
                println!("{}", serde_json::to_string(&session.stats_message())?);
            }
            _ = &mut deadline => {
                info!("Duration elapsed");
                break;
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    session.shutdown();
    connection.stop().context("Failed to flush frame sink")?;
    info!(
        "Sent {} frame(s), {} silent tick(s)",
        connection.frames_sent(),
        connection.frames_silent()
    );
    Ok(())
}
