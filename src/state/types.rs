use chrono::{DateTime, Utc};
use liverelay_media::StreamingState;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use crate::config::StreamingMode;

/// One ingest run feeding the buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: Uuid,
    /// Where the fragments come from (file path or `stdin`)
    pub source: String,
    pub started_at: DateTime<Utc>,
}

impl RecordingSession {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            started_at: Utc::now(),
        }
    }
}

/// Per-client view exposed in `/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSnapshot {
    pub ip: IpAddr,
    pub get_requests: u64,
    pub post_requests: u64,
    pub fragments_served: u64,
    pub bytes_served: u64,
    pub session_duration_secs: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientEventKind {
    Connected,
    Disconnected,
    FirstRequest,
    DataMilestone,
}

/// Entry in the client event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientEvent {
    pub ip: IpAddr,
    pub event: ClientEventKind,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

impl ClientEvent {
    pub fn new(ip: IpAddr, event: ClientEventKind, details: impl Into<String>) -> Self {
        Self {
            ip,
            event,
            timestamp: Utc::now(),
            details: details.into(),
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub streaming: bool,
    pub mode: StreamingMode,
    pub state: StreamingState,
    pub message: String,
    pub is_recording: bool,
    pub fragments_buffered: usize,
    pub buffer_size_mb: f64,
    pub latest_sequence: u64,
    pub oldest_sequence: u64,
    pub active_connections: usize,
    pub has_init_segment: bool,
    pub uptime_seconds: i64,
    pub ingest_gaps: u64,
    pub total_data_transferred_mb: f64,
    pub clients: Vec<ClientSnapshot>,
    /// Most recent client events, oldest first
    pub events: Vec<ClientEvent>,
}

/// Convert a byte count to megabytes rounded to two decimals.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}
