//! Follow a file with multiline grouping and print every event
//!
//! Run with: cargo run --example tail_file -- /var/log/app.log

use logtail::config::{HarvesterConfig, MultilineConfig, ReaderConfig};
use logtail::harvester::Harvester;
use logtail::source::FileSource;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("logtail=debug")
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "/var/log/syslog".to_string());

    // Lines that do not start with a date belong to the previous event
    let config = ReaderConfig {
        multiline: Some(MultilineConfig {
            pattern: r"^\d{4}-\d{2}-\d{2}".to_string(),
            negate: true,
            match_mode: "after".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };

    let source = FileSource::open(&path).await?;
    let harvester = Harvester::open(Box::new(source), &config, &HarvesterConfig::default(), 0).await?;
    let cancel = harvester.cancel_token();

    let (tx, mut rx) = mpsc::channel(128);
    let handle = harvester.spawn(tx);

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel.cancel();
    });

    while let Some(event) = rx.recv().await {
        println!("[{} @ {}] {}", event.message.ts, event.offset, event.message.text());
    }

    let report = handle.await?;
    println!("stopped: {} (resume from {})", report.outcome, report.resume_offset());
    Ok(())
}
