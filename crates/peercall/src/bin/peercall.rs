//! Two-party call client
//!
//! Joins a room on the relay, negotiates a peer connection and turns stdin
//! into chat over the data channel.
//!
//! # Usage
//!
//! ```bash
//! # Start the relay, then run one client per participant
//! cargo run --bin relay_server -- --bind 127.0.0.1:8080
//! cargo run --bin peercall -- --relay-url ws://127.0.0.1:8080 --room r1
//! cargo run --bin peercall -- --relay-url ws://127.0.0.1:8080 --room r1
//!
//! # Same host: skip STUN, trickle candidates
//! cargo run --bin peercall -- --room r1 --no-stun --ice-policy trickle
//! ```
//!
//! Type a line to send it; `/bye` or Ctrl+C hangs up.

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use peercall::media::LogSink;
use peercall::room::RoomPrompt;
use peercall::{
    Call, CallConfig, CallDeps, CallHandle, DataChannelMode, IcePolicy, MediaSinks,
    NegotiationState, Notification,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// PeerCall client
///
/// Video call with a text chat between exactly two participants of a room.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; command line flags override it
    #[arg(long, env = "PEERCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Relay WebSocket URL
    #[arg(long, env = "PEERCALL_RELAY_URL")]
    relay_url: Option<String>,

    /// Room to join (prompted for when absent)
    #[arg(long, env = "PEERCALL_ROOM")]
    room: Option<String>,

    /// STUN server URL
    #[arg(long, env = "PEERCALL_STUN_SERVER")]
    stun_server: Option<String>,

    /// Disable STUN (host candidates only)
    #[arg(long, default_value_t = false, conflicts_with = "stun_server")]
    no_stun: bool,

    /// ICE candidate delivery: full-description, trickle
    #[arg(long, env = "PEERCALL_ICE_POLICY")]
    ice_policy: Option<IcePolicyArg>,

    /// Data channel mode: reliable, unreliable
    #[arg(long, env = "PEERCALL_DATA_CHANNEL_MODE")]
    data_channel_mode: Option<DataChannelModeArg>,

    /// Negotiation timeout per state in seconds (0 disables)
    #[arg(long, env = "PEERCALL_NEGOTIATION_TIMEOUT")]
    negotiation_timeout_secs: Option<u64>,
}

/// ICE policy CLI argument wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum IcePolicyArg {
    FullDescription,
    Trickle,
}

impl From<IcePolicyArg> for IcePolicy {
    fn from(arg: IcePolicyArg) -> Self {
        match arg {
            IcePolicyArg::FullDescription => IcePolicy::FullDescriptionOnComplete,
            IcePolicyArg::Trickle => IcePolicy::Trickle,
        }
    }
}

/// Data channel mode CLI argument wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum DataChannelModeArg {
    Reliable,
    Unreliable,
}

impl From<DataChannelModeArg> for DataChannelMode {
    fn from(arg: DataChannelModeArg) -> Self {
        match arg {
            DataChannelModeArg::Reliable => DataChannelMode::Reliable,
            DataChannelModeArg::Unreliable => DataChannelMode::Unreliable,
        }
    }
}

/// Build the call configuration: file (or defaults), then flag overrides
fn build_config_from_args(args: &Args) -> anyhow::Result<CallConfig> {
    let mut config = match &args.config {
        Some(path) => CallConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CallConfig::default(),
    };

    if let Some(url) = &args.relay_url {
        config.relay_url = url.clone();
    }
    if args.room.is_some() {
        config.room = args.room.clone();
    }
    if args.no_stun {
        config.stun_server = None;
    } else if let Some(stun) = &args.stun_server {
        config.stun_server = Some(stun.clone());
    }
    if let Some(policy) = args.ice_policy {
        config.ice_policy = policy.into();
    }
    if let Some(mode) = args.data_channel_mode {
        config.data_channel_mode = mode.into();
    }
    match args.negotiation_timeout_secs {
        Some(0) => config.negotiation_timeout_secs = None,
        Some(secs) => config.negotiation_timeout_secs = Some(secs),
        None => {}
    }

    config.validate()?;
    Ok(config)
}

/// Room names tried before giving up
const MAX_ROOM_ATTEMPTS: usize = 3;

type StdinLines = Arc<Mutex<Lines<BufReader<Stdin>>>>;

/// Room prompt on stdin
struct StdinPrompt {
    lines: StdinLines,
}

#[async_trait]
impl RoomPrompt for StdinPrompt {
    async fn prompt_room_name(&self) -> Option<String> {
        let mut stdout = tokio::io::stdout();
        let _ = stdout.write_all(b"Room name: ").await;
        let _ = stdout.flush().await;
        self.lines.lock().await.next_line().await.ok().flatten()
    }
}

fn render(notification: &Notification) {
    match notification {
        Notification::Chat(text) => println!("peer> {}", text),
        Notification::Status(status) => println!("*** {}", status),
        Notification::RoleAssigned(role) => println!("*** You are the {}", role),
        Notification::PeerJoined => println!("*** Peer joined"),
        Notification::ChannelOpen => println!("*** Data channel open, type to chat"),
        Notification::StateChanged(state) => info!(%state, "Call state"),
        Notification::Failed(reason) => eprintln!("*** Call failed: {}", reason),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = build_config_from_args(&args)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        relay_url = %config.relay_url,
        room = ?config.room,
        stun_server = ?config.stun_server,
        ice_policy = ?config.ice_policy,
        "PeerCall client starting"
    );

    let lines: StdinLines = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));
    let deps = CallDeps::webrtc(&config)
        .with_prompt(Arc::new(StdinPrompt {
            lines: Arc::clone(&lines),
        }))
        .with_sinks(MediaSinks {
            local: Some(Arc::new(LogSink::new("local"))),
            remote: Some(Arc::new(LogSink::new("remote"))),
        });

    let mut call = start_call(config, deps).await?;
    let mut notifications = call
        .take_notifications()
        .context("Notification stream already taken")?;
    let mut state = call.watch_state();

    println!("*** Joined room '{}' as {}", call.room(), call.role());

    loop {
        tokio::select! {
            line = async { lines.lock().await.next_line().await } => {
                match line {
                    Ok(Some(line)) if line.trim() == "/bye" => break,
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        if let Err(e) = call.send_chat(line).await {
                            warn!(error = %e, "Message not sent");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
            Some(notification) = notifications.recv() => render(&notification),
            changed = state.changed() => {
                let current = *state.borrow();
                if changed.is_err() || current.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, hanging up");
                break;
            }
        }
    }

    let report = call.hang_up().await;
    while let Ok(notification) = notifications.try_recv() {
        render(&notification);
    }
    info!(?report, "Call ended");

    if call.state() == NegotiationState::Failed {
        anyhow::bail!("call failed");
    }
    Ok(())
}

/// Start the call, asking for another room while the failure allows it
async fn start_call(mut config: CallConfig, deps: CallDeps) -> anyhow::Result<CallHandle> {
    let mut attempt = 1;
    loop {
        match Call::start(config.clone(), deps.clone()).await {
            Ok(call) => return Ok(call),
            Err(e) if e.is_retryable() && attempt < MAX_ROOM_ATTEMPTS => {
                println!("*** {}, pick another room", e);
                config.room = None;
                attempt += 1;
            }
            Err(e) if e.is_setup_error() => {
                return Err(anyhow::Error::new(e).context("Could not set up the call"));
            }
            Err(e) => return Err(anyhow::Error::new(e).context("Negotiation failed while starting")),
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,peercall=debug"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
