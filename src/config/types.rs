use liverelay_media::PlaylistOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on handling a single request, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Drop a connection whose client stops reading for this long
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Forget client metrics after this many idle seconds
    #[serde(default = "default_client_expiry")]
    pub client_expiry_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    5
}
fn default_write_timeout() -> u64 {
    10
}
fn default_client_expiry() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            write_timeout_secs: default_write_timeout(),
            client_expiry_secs: default_client_expiry(),
        }
    }
}

/// Whether the recording is kept after streaming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    StreamOnly,
    #[default]
    StreamAndSave,
}

impl StreamingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StreamOnly => "stream_only",
            Self::StreamAndSave => "stream_and_save",
        }
    }
}

impl std::fmt::Display for StreamingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StreamingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stream_only" => Ok(Self::StreamOnly),
            "stream_and_save" => Ok(Self::StreamAndSave),
            other => Err(format!("unknown streaming mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Accept fragments as soon as the server starts
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub mode: StreamingMode,

    /// Ring buffer slots (one fragment each)
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Newest fragments listed in the playlist
    #[serde(default = "default_live_edge")]
    pub live_edge: usize,

    /// Fragments required before the playlist is served
    #[serde(default = "default_min_ready")]
    pub min_ready_fragments: usize,

    #[serde(default = "default_target_duration")]
    pub target_duration_secs: u32,

    #[serde(default = "default_fragment_duration")]
    pub fragment_duration_secs: f64,

    /// Cache lifetime advertised for /init.mp4 (0 means revalidate via ETag)
    #[serde(default = "default_init_max_age")]
    pub init_cache_max_age_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_buffer_capacity() -> usize {
    liverelay_media::buffer::DEFAULT_CAPACITY
}
fn default_live_edge() -> usize {
    5
}
fn default_min_ready() -> usize {
    2
}
fn default_target_duration() -> u32 {
    4
}
fn default_fragment_duration() -> f64 {
    1.0
}
fn default_init_max_age() -> u64 {
    31_536_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: StreamingMode::default(),
            buffer_capacity: default_buffer_capacity(),
            live_edge: default_live_edge(),
            min_ready_fragments: default_min_ready(),
            target_duration_secs: default_target_duration(),
            fragment_duration_secs: default_fragment_duration(),
            init_cache_max_age_secs: default_init_max_age(),
        }
    }
}

impl StreamConfig {
    pub fn playlist_options(&self) -> PlaylistOptions {
        PlaylistOptions {
            live_edge: self.live_edge,
            min_ready: self.min_ready_fragments,
            target_duration: self.target_duration_secs,
            fragment_duration: self.fragment_duration_secs,
            ..PlaylistOptions::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// How often a followed file is polled for new data
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Stop following a file after this long without new data
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Reject boxes larger than this many bytes
    #[serde(default = "default_max_box_size")]
    pub max_box_size: u64,
}

fn default_poll_interval() -> u64 {
    200
}
fn default_idle_timeout() -> u64 {
    10
}
fn default_max_box_size() -> u64 {
    liverelay_media::fmp4::DEFAULT_MAX_BOX_SIZE
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            idle_timeout_secs: default_idle_timeout(),
            max_box_size: default_max_box_size(),
        }
    }
}
