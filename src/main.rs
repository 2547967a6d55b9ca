//! logtail binary
//!
//! Follows a single file (or stdin) through the reader pipeline and prints
//! every event as a JSON line on stdout.

use clap::Parser;
use logtail::config::{Config, MultilineConfig};
use logtail::harvester::{Harvester, HarvestOutcome, Registry};
use logtail::source::{FileSource, Source, StdinSource};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "logtail")]
#[command(about = "Follow a log file and print its events as JSON lines")]
#[command(version)]
struct Args {
    /// File to follow
    #[arg(required_unless_present = "stdin", conflicts_with = "stdin")]
    path: Option<PathBuf>,

    /// Read from standard input instead of a file
    #[arg(long)]
    stdin: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "config/logtail.toml")]
    config: PathBuf,

    /// Encoding of the source
    #[arg(short, long)]
    encoding: Option<String>,

    /// Raw byte offset to resume from
    #[arg(long, default_value_t = 0)]
    offset: u64,

    /// Group lines into events with this pattern
    #[arg(long)]
    multiline_pattern: Option<String>,

    /// Multiline match mode (`after` or `before`)
    #[arg(long, default_value = "after")]
    multiline_match: String,

    /// Invert the multiline pattern
    #[arg(long)]
    multiline_negate: bool,

    /// Stop at end of file instead of waiting for more data
    #[arg(long)]
    close_eof: bool,

    /// Only print lines matching this pattern (repeatable)
    #[arg(long = "include")]
    include_lines: Vec<String>,

    /// Drop lines matching this pattern (repeatable)
    #[arg(long = "exclude")]
    exclude_lines: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // stdout carries events, so diagnostics go to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(if args.verbose {
            "logtail=debug,info"
        } else {
            "logtail=info,warn,error"
        })
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting logtail v{}", env!("CARGO_PKG_VERSION"));

    let mut config = if args.config.exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    // Override config with CLI arguments
    if let Some(encoding) = args.encoding {
        config.reader.encoding = encoding;
    }
    if let Some(pattern) = args.multiline_pattern {
        let multiline = config.reader.multiline.get_or_insert_with(MultilineConfig::default);
        multiline.pattern = pattern;
        multiline.match_mode = args.multiline_match;
        multiline.negate = args.multiline_negate;
    }
    if args.close_eof {
        config.reader.tail.close_eof = true;
    }
    if !args.include_lines.is_empty() {
        config.harvester.include_lines = args.include_lines;
    }
    if !args.exclude_lines.is_empty() {
        config.harvester.exclude_lines = args.exclude_lines;
    }

    config.validate()?;

    let source: Box<dyn Source> = match &args.path {
        Some(path) => open_file(path).await?,
        None => Box::new(StdinSource::stdin()),
    };

    let registry = Registry::new(config.harvester.harvester_limit);
    let harvester = Harvester::open(source, &config.reader, &config.harvester, args.offset)
        .await?
        .register(&registry)?;

    let cancel = harvester.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                cancel.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let (tx, mut rx) = mpsc::channel(config.harvester.channel_size);
    let handle = harvester.spawn(tx);

    let stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        let line = serde_json::to_string(&event)?;
        let mut out = stdout.lock();
        writeln!(out, "{}", line)?;
        out.flush()?;
    }

    let report = handle.await?;
    info!(
        "Harvester stopped: {} at offset {} (resume from {}), {} events",
        report.outcome,
        report.offset,
        report.resume_offset(),
        report.events
    );

    if let HarvestOutcome::Failed(e) = report.outcome {
        error!("Harvesting {} failed: {}", report.source, e);
        std::process::exit(1);
    }

    Ok(())
}

async fn open_file(path: &Path) -> Result<Box<dyn Source>, Box<dyn std::error::Error>> {
    #[cfg(feature = "compression")]
    if path.extension().is_some_and(|ext| ext == "gz") {
        return Ok(Box::new(logtail::source::GzipSource::open(path).await?));
    }

    Ok(Box::new(FileSource::open(path).await?))
}
