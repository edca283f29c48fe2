mod cli;

use liverelay::{
    config,
    ingest::{IngestInput, IngestSource},
    server, state,
};
use liverelay_media::{BoxSplitter, FragmentBuffer, SplitEvent};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    input: Option<String>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    // Load config
    let resolved_config_path = config::locate_config(config_path);
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting liverelay");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    let buffer = Arc::new(FragmentBuffer::new(config.stream.buffer_capacity));
    buffer.set_enabled(config.stream.enabled);
    let live = state::LiveState::new(
        buffer,
        config.stream.mode,
        config.server.client_expiry_secs,
    );

    // Start ingest if an input was given
    let ingest_handle = input.map(|arg| {
        let source = IngestSource::new(live.clone(), config.ingest.clone());
        let input = IngestInput::parse(&arg);
        tracing::info!("Ingesting from {}", input.label());
        tokio::spawn(async move {
            match source.run(input).await {
                Ok(summary) => tracing::info!(
                    fragments = summary.fragments,
                    gaps = summary.gaps,
                    "Ingest source ended"
                ),
                Err(e) => tracing::error!("Ingest failed: {:#}", e),
            }
        })
    });

    let ctx = server::AppContext::new(config, live).with_config_path(resolved_config_path);
    let server_result = server::start_server(ctx).await;

    // Cleanup
    tracing::info!("Shutting down...");
    if let Some(handle) = ingest_handle {
        handle.abort();
    }

    server_result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "liverelay=trace,liverelay_media=trace,tower_http=debug".to_string()
        } else {
            "liverelay=info,liverelay_media=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port, input } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, input, cli.config.as_deref()))
        }
        Commands::Inspect { file, json } => inspect_file(&file, json, cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("liverelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

#[derive(serde::Serialize)]
struct InspectedFragment {
    sequence: Option<u32>,
    size: usize,
}

#[derive(serde::Serialize)]
struct InspectReport {
    init_segments: Vec<usize>,
    fragments: Vec<InspectedFragment>,
    trailing_bytes: usize,
}

fn inspect_file(
    file: &std::path::Path,
    json: bool,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let data =
        std::fs::read(file).with_context(|| format!("Failed to read file: {:?}", file))?;

    let mut splitter = BoxSplitter::new(config.ingest.max_box_size);
    let events = splitter
        .push(&data)
        .with_context(|| format!("Failed to parse fMP4: {:?}", file))?;

    let mut report = InspectReport {
        init_segments: Vec::new(),
        fragments: Vec::new(),
        trailing_bytes: splitter.buffered_len(),
    };
    for event in events {
        match event {
            SplitEvent::Init(payload) => report.init_segments.push(payload.len()),
            SplitEvent::Fragment { sequence, payload } => {
                report.fragments.push(InspectedFragment {
                    sequence,
                    size: payload.len(),
                })
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Init segments: {}", report.init_segments.len());
    for (i, size) in report.init_segments.iter().enumerate() {
        println!("  [{}] {} bytes", i, size);
    }
    println!("\nFragments: {}", report.fragments.len());
    for fragment in &report.fragments {
        match fragment.sequence {
            Some(seq) => println!("  #{} {} bytes", seq, fragment.size),
            None => println!("  (no mfhd) {} bytes", fragment.size),
        }
    }
    if report.trailing_bytes > 0 {
        println!("\nIncomplete trailing data: {} bytes", report.trailing_bytes);
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Streaming enabled: {}", config.stream.enabled);
            println!("  Mode: {}", config.stream.mode);
            println!(
                "  Buffer: {} fragments, live edge {}",
                config.stream.buffer_capacity, config.stream.live_edge
            );
            println!(
                "  Fragment duration: {:.3}s (target {}s)",
                config.stream.fragment_duration_secs, config.stream.target_duration_secs
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}
