pub mod persist;
mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const DEFAULT_PATHS: [&str; 4] = [
    "./liverelay.toml",
    "./config.toml",
    "~/.config/liverelay/config.toml",
    "/etc/liverelay/config.toml",
];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Find the config file that would be loaded, if any
pub fn locate_config(custom_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = custom_path {
        return Some(path.to_path_buf());
    }

    DEFAULT_PATHS
        .iter()
        .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
        .find(|p| p.exists())
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    match locate_config(custom_path) {
        Some(path) => load_config(&path),
        None => Ok(Config::default()),
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }
    if config.server.request_timeout_secs == 0 {
        anyhow::bail!("request_timeout_secs must be at least 1");
    }
    if config.server.write_timeout_secs == 0 {
        anyhow::bail!("write_timeout_secs must be at least 1");
    }

    let stream = &config.stream;
    if stream.buffer_capacity < 2 {
        anyhow::bail!(
            "buffer_capacity must be at least 2 (got {})",
            stream.buffer_capacity
        );
    }
    if stream.live_edge == 0 || stream.live_edge > stream.buffer_capacity {
        anyhow::bail!(
            "live_edge must be between 1 and buffer_capacity ({}), got {}",
            stream.buffer_capacity,
            stream.live_edge
        );
    }
    if stream.min_ready_fragments < 2 || stream.min_ready_fragments > stream.buffer_capacity {
        anyhow::bail!(
            "min_ready_fragments must be between 2 and buffer_capacity ({}), got {}",
            stream.buffer_capacity,
            stream.min_ready_fragments
        );
    }
    if stream.fragment_duration_secs.is_nan() || stream.fragment_duration_secs <= 0.0 {
        anyhow::bail!("fragment_duration_secs must be positive");
    }
    if (stream.target_duration_secs as f64) < stream.fragment_duration_secs.ceil() {
        anyhow::bail!(
            "target_duration_secs ({}) is shorter than a fragment ({}s)",
            stream.target_duration_secs,
            stream.fragment_duration_secs
        );
    }

    if config.ingest.poll_interval_ms == 0 {
        anyhow::bail!("poll_interval_ms must be at least 1");
    }
    if config.ingest.max_box_size < 8 {
        anyhow::bail!("max_box_size is too small to hold a box header");
    }

    Ok(())
}
