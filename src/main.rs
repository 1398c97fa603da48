//! Tapedeck CLI

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tapedeck::config::{Config, Mode};
use tapedeck::network::NetworkHandler;
use tapedeck::proxy::HttpProxy;
use tapedeck::storage::{self, Generation};

#[derive(Parser)]
#[command(name = "tapedeck", version, about = "HTTP record-replay proxy")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Forward to the upstream and record every exchange
    Record(ServeArgs),
    /// Serve recorded exchanges without contacting the upstream
    Replay(ServeArgs),
    /// Show what is stored in a recording directory
    Stats {
        /// Recording directory
        dir: PathBuf,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for storing/loading recordings
    #[arg(long)]
    recording_dir: Option<PathBuf>,

    /// Sequence activated at startup
    #[arg(long)]
    sequence: Option<String>,

    /// Upstream to forward to in record mode
    #[arg(long, value_name = "HOST:PORT")]
    target: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Header whose value is replaced in recordings (repeatable)
    #[arg(long = "redact", value_name = "HEADER")]
    redact: Vec<String>,

    /// Do not store decoded plaintext next to encoded bodies
    #[arg(long)]
    no_plaintext: bool,
}

impl ServeArgs {
    fn into_config(self, mode: Mode) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => Config::new(mode),
        };
        config.mode = mode;

        if let Some(dir) = self.recording_dir {
            config.recording_dir = dir;
        }
        if let Some(sequence) = self.sequence {
            config.sequence = sequence;
        }
        if let Some(target) = self.target {
            let (host, port) = parse_target(&target)?;
            config.endpoint.target_host = host;
            config.endpoint.target_port = port;
        }
        if let Some(port) = self.port {
            config.endpoint.listen_port = port;
        }
        config.recording.redact_headers.extend(self.redact);
        if self.no_plaintext {
            config.recording.include_plaintext = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_target(target: &str) -> anyhow::Result<(String, u16)> {
    let Some((host, port)) = target.rsplit_once(':') else {
        bail!("Target must be HOST:PORT, got '{target}'");
    };
    if host.is_empty() {
        bail!("Target host cannot be empty");
    }
    let port = port
        .parse::<u16>()
        .with_context(|| format!("Invalid target port '{port}'"))?;

    Ok((host.to_string(), port))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Record(args) => serve(args.into_config(Mode::Record)?).await,
        Command::Replay(args) => serve(args.into_config(Mode::Replay)?).await,
        Command::Stats { dir } => show_stats(&dir).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!(
        "Tapedeck v{} starting in {} mode (sequence '{}', recordings in {})",
        env!("CARGO_PKG_VERSION"),
        config.mode,
        config.sequence,
        config.recording_dir.display()
    );
    if config.mode.is_record() {
        info!(
            "Forwarding to {}:{}",
            config.endpoint.target_host, config.endpoint.target_port
        );
    }

    let proxy = Arc::new(HttpProxy::from_config(&config).await?);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.endpoint.listen_port));
    let handler = NetworkHandler::bind(addr, proxy, config.limits.max_connections)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    handler.run().await?;
    Ok(())
}

async fn show_stats(dir: &Path) -> anyhow::Result<()> {
    if !dir.exists() {
        bail!("Directory not found: {}", dir.display());
    }

    let sequences = storage::inventory(dir).await?;

    println!("Recording directory: {}", dir.display());
    println!();

    if sequences.is_empty() {
        println!("No sequences recorded.");
        return Ok(());
    }

    let mut total = 0;
    for sequence in &sequences {
        let count: usize = sequence.files.iter().map(|file| file.interactions).sum();
        total += count;
        println!("{} ({} interaction(s))", sequence.name, count);

        for file in &sequence.files {
            let generation = match file.generation {
                Generation::Current => "",
                Generation::Legacy => " [legacy]",
            };
            println!("  {:<48} {:>6}{}", file.key.as_str(), file.interactions, generation);
        }
    }

    println!();
    println!("{} sequence(s), {} interaction(s)", sequences.len(), total);
    Ok(())
}
