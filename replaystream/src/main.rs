mod driver;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use replaystream_core::{logging, Config, ReplayVersion};

use driver::Driver;

/// Record and play back replay sessions over HTTP
#[derive(Parser, Debug)]
#[command(name = "replaystream", version)]
struct Cli {
    /// Configuration file (toml, yaml or json)
    #[arg(short, long, env = "REPLAYSTREAM_CONFIG")]
    config: Option<String>,

    /// Replay service base URL, overrides `server.url`
    #[arg(long)]
    server: Option<String>,

    /// Network version the session is tagged with
    #[arg(long, default_value_t = 1)]
    network_version: u32,

    /// Changelist the session is tagged with
    #[arg(long, default_value_t = 0)]
    changelist: u32,

    /// Tick period in milliseconds
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file as a new session
    Record(RecordArgs),
    /// Download a session into a file
    Play(PlayArgs),
    /// List sessions known to the server
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Payload to stream
    #[arg(long)]
    pub input: PathBuf,

    /// Human readable session name
    #[arg(long, default_value = "")]
    pub friendly: String,

    /// Users attached to the session
    #[arg(long = "user")]
    pub users: Vec<String>,

    /// Bytes written per frame
    #[arg(long, default_value_t = 4096)]
    pub chunk_bytes: usize,

    /// Demo time advanced per frame
    #[arg(long, default_value_t = 100)]
    pub frame_ms: u32,

    /// Capture a checkpoint every N frames
    #[arg(long)]
    pub checkpoint_every: Option<usize>,
}

#[derive(Args, Debug)]
pub struct PlayArgs {
    #[arg(long)]
    pub session: String,

    /// User the viewer is registered as
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub output: PathBuf,

    /// Seek to this demo time before downloading
    #[arg(long)]
    pub goto_ms: Option<u32>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub meta: Option<String>,

    /// Only sessions this viewer watched recently
    #[arg(long)]
    pub recent: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(url) = cli.server {
        config.server.url = url;
    }
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        anyhow::bail!("Configuration validation failed with {} error(s)", errors.len());
    }

    logging::init_logging(&config.logging)?;
    info!(server = %config.server.url, "replaystream starting");

    let version = ReplayVersion::new(
        config.streamer.app_name.clone(),
        cli.network_version,
        cli.changelist,
    );
    let mut driver = Driver::new(&config, version, Duration::from_millis(cli.tick_ms.max(1)))?;

    match cli.command {
        Command::Record(args) => driver.record(args).await.map(|_| ()),
        Command::Play(args) => driver.play(args).await,
        Command::List(args) => driver.list(args).await,
    }
}
