//! Streamtap replay - feed a recorded chunk stream through the proxy

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use streamtap::attributes::FlattenExtractor;
use streamtap::config::Config;
use streamtap::error::{Result, TapError};
use streamtap::span::TracingSpan;
use streamtap::{MapSchema, instrument};

/// Streamtap - replay streamed LLM responses through the instrumentation proxy
#[derive(Parser)]
#[command(name = "streamtap")]
#[command(about = "Replay a recorded chunk stream through the instrumentation proxy")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay a JSONL file, one chunk per line
    Replay {
        /// File to replay. A line `{"$error": "..."}` makes the stream fail there.
        file: PathBuf,

        /// Drive the proxy through `Iterator` instead of `Stream`
        #[arg(long)]
        sync: bool,
    },
}

/// Error yielded by the replayed stream for `$error` lines
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ReplayError(String);

type Chunk = std::result::Result<Value, ReplayError>;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Replay { file, sync } => replay(cli.config, &file, sync).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,streamtap=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    if let Some(path) = config_path {
        tracing::info!("Loading config from: {}", path.display());
        return Config::from_path(&path);
    }

    let default_paths = [
        dirs::home_dir().map(|h| h.join(".streamtap").join("config.toml")),
        dirs::config_dir().map(|c| c.join("streamtap").join("config.toml")),
        Some(PathBuf::from("streamtap.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            tracing::info!("Loading config from: {}", path.display());
            return Config::from_path(path);
        }
    }

    tracing::info!("No config file found, using defaults");
    Ok(Config::default())
}

fn read_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let content = std::fs::read_to_string(path)?;
    let mut chunks = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: Value = serde_json::from_str(line).map_err(|e| {
            TapError::Serialization(format!("{}:{}: {e}", path.display(), line_no + 1))
        })?;

        match value.get("$error").and_then(Value::as_str) {
            Some(message) => chunks.push(Err(ReplayError(message.to_string()))),
            None => chunks.push(Ok(value)),
        }
    }

    Ok(chunks)
}

fn emit(item: Chunk) -> Result<bool> {
    match item {
        Ok(chunk) => {
            println!("{}", serde_json::to_string(&chunk)?);
            Ok(true)
        }
        Err(e) => {
            eprintln!("Stream failed: {e}");
            Ok(false)
        }
    }
}

async fn replay(config_path: Option<PathBuf>, file: &Path, sync: bool) -> Result<()> {
    let config = load_config(config_path)?;
    tracing::debug!("Config loaded: {:?}", config);

    let chunks = read_chunks(file)?;
    tracing::info!("Replaying {} chunks from {}", chunks.len(), file.display());

    let sink = Box::new(TracingSpan::new(&config.span.name));
    let extractor = Box::new(FlattenExtractor::default());

    if sync {
        let proxy = instrument(chunks.into_iter(), MapSchema::new(), sink, extractor, &config);
        for item in proxy {
            if !emit(item)? {
                break;
            }
        }
    } else {
        let mut proxy = instrument(
            futures::stream::iter(chunks),
            MapSchema::new(),
            sink,
            extractor,
            &config,
        );
        while let Some(item) = proxy.next().await {
            if !emit(item)? {
                break;
            }
        }
    }

    Ok(())
}
