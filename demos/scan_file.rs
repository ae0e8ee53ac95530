//! Scans files with a running engine and prints the verdicts as JSON.
//!
//! This example shows how to:
//! - Load a `ClientConfig` from TOML and environment overrides
//! - Query the engine's version
//! - Scan several files through the shared queue
//!
//! Run with: cargo run --example scan_file -- <path>...
//!
//! Set `SCANLINE_CONFIG` to a TOML file to override defaults, or pass
//! `--mock` to run against the in-memory engine instead of a real socket.

use scanline::backends::{MockEngine, ScriptedReply};
use scanline::prelude::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut use_mock = false;
    let mut paths = Vec::new();
    for arg in std::env::args().skip(1) {
        if arg == "--mock" {
            use_mock = true;
        } else {
            paths.push(arg);
        }
    }
    if paths.is_empty() {
        eprintln!("usage: scan_file [--mock] <path>...");
        std::process::exit(2);
    }

    let mut config = match std::env::var("SCANLINE_CONFIG") {
        Ok(file) => ClientConfig::from_file(file).await?,
        Err(_) => ClientConfig::default(),
    };
    config.apply_env_overrides();

    let mut builder = ScanClient::builder().with_config(config);
    if use_mock {
        // Flags every path ending in ".exe" so the output shows both outcomes.
        let engine = MockEngine::new();
        for path in &paths {
            if path.ends_with(".exe") {
                let target = ScanTarget::resolve(path).await?;
                engine.add_reply(target.key(), ScriptedReply::infected("Win32:DemoTrojan"));
            }
        }
        builder = builder.with_connector(Arc::new(engine));
    }
    let client = builder.build()?;

    println!("=== Scanline Scan Example ===\n");

    match client.get_info().await {
        Ok(info) => println!("Engine definitions: {}\n", info.virus_definitions_version),
        Err(e) => println!("Engine info unavailable: {}\n", e),
    }

    let mut unsafe_count = 0;
    for path in &paths {
        match client.scan_file(path).await {
            Ok(verdict) => {
                if !verdict.is_safe() {
                    unsafe_count += 1;
                }
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            }
            Err(e) => {
                unsafe_count += 1;
                println!("{}: {}", path, e);
            }
        }
    }

    let metrics = client.connection_metrics();
    println!(
        "\nScanned {} path(s), {} not safe; {} connection(s), {} record(s) received",
        paths.len(),
        unsafe_count,
        metrics.connect_successes,
        metrics.records_received
    );

    client.close().await;
    Ok(())
}
