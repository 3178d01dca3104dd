//! Pinpair Signal Broker
//!
//! Rendezvous broker for pairing two peers by room code.
//!
//! # Usage
//!
//! ```bash
//! # Both endpoints, in-memory rooms (default)
//! pinpair-signal
//!
//! # Polling only, with SQLite persistence shared between processes
//! pinpair-signal --mode poll --http-port 8000 --db /var/lib/pinpair/rooms.db
//!
//! # WebSocket only
//! pinpair-signal --mode push --ws-port 8080
//! ```

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pinpair_core::{Clock, Config, SignalConfig, SystemClock};
use pinpair_signal::{MemoryStore, PollBroker, PollServer, PushHub, PushServer, RoomStore, SqliteStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// HTTP polling endpoint only
    Poll,
    /// WebSocket endpoint only
    Push,
    /// Both endpoints
    Both,
}

#[derive(Parser, Debug)]
#[command(name = "pinpair-signal")]
#[command(about = "Pinpair rendezvous broker for peer pairing and signal relay")]
#[command(version)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "PINPAIR_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Polling endpoint port
    #[arg(long)]
    http_port: Option<u16>,

    /// WebSocket endpoint port
    #[arg(long)]
    ws_port: Option<u16>,

    /// SQLite database path for polling rooms (in-memory if not specified)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Which endpoints to serve
    #[arg(short, long, value_enum, default_value_t = Mode::Both)]
    mode: Mode,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(args.log_json.then(|| fmt::layer().json()))
        .with((!args.log_json).then(fmt::layer))
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    apply_overrides(&mut config.signal, &args)?;

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let signal = config.signal;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sweep_every =
        (signal.sweep_interval_secs > 0).then(|| Duration::from_secs(signal.sweep_interval_secs));

    info!("Starting Pinpair Signal Broker ({:?})", args.mode);

    let poll = async {
        if args.mode == Mode::Push {
            return Ok(());
        }
        run_poll(&signal, clock.clone(), sweep_every).await
    };

    let push = async {
        if args.mode == Mode::Poll {
            return Ok(());
        }
        let addr = SocketAddr::new(signal.bind, signal.ws_port);
        let hub = PushHub::new(signal.policy(), clock.clone());
        PushServer::spawn(hub, sweep_every)
            .serve(addr)
            .await
            .map_err(|e| Box::new(e) as Box<dyn Error>)
    };

    tokio::try_join!(poll, push)?;
    Ok(())
}

fn apply_overrides(signal: &mut SignalConfig, args: &Args) -> Result<(), Box<dyn Error>> {
    if let Some(bind) = &args.bind {
        signal.bind = bind.parse()?;
    }
    if let Some(port) = args.http_port {
        signal.http_port = port;
    }
    if let Some(port) = args.ws_port {
        signal.ws_port = port;
    }
    if let Some(db) = &args.db {
        signal.db_path = Some(db.clone());
    }
    Ok(())
}

async fn run_poll(
    signal: &SignalConfig,
    clock: Arc<dyn Clock>,
    sweep_every: Option<Duration>,
) -> Result<(), Box<dyn Error>> {
    let addr = SocketAddr::new(signal.bind, signal.http_port);

    match &signal.db_path {
        Some(db_path) => {
            // Create parent directory if it doesn't exist
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            info!("Using SQLite persistence: {:?}", db_path);
            let store = SqliteStore::open(db_path)?;
            info!("Loaded {} rooms from database", store.room_count().unwrap_or(0));
            serve_poll(store, signal, clock, sweep_every, addr).await
        }
        None => {
            info!("Using in-memory storage (no persistence)");
            serve_poll(MemoryStore::new(), signal, clock, sweep_every, addr).await
        }
    }
}

async fn serve_poll<S: RoomStore + 'static>(
    store: S,
    signal: &SignalConfig,
    clock: Arc<dyn Clock>,
    sweep_every: Option<Duration>,
    addr: SocketAddr,
) -> Result<(), Box<dyn Error>> {
    let broker = PollBroker::new(store, signal.policy(), clock);
    PollServer::new(broker, sweep_every).serve(addr).await?;
    Ok(())
}
