//! Live session state shared by the ingest task and the HTTP handlers.

mod clients;
mod types;

pub use clients::{start_cleanup_task, ClientRegistry, RequestKind, Served};
pub use types::*;

use chrono::{DateTime, Utc};
use liverelay_media::{FragmentBuffer, StreamingState};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::StreamingMode;

/// Client events included in `/status`.
const STATUS_EVENTS: usize = 20;

/// Recording session, streaming mode and connection accounting around the
/// fragment buffer.
pub struct LiveState {
    buffer: Arc<FragmentBuffer>,
    recording: RwLock<Option<RecordingSession>>,
    mode: RwLock<StreamingMode>,
    streaming_since: RwLock<Option<DateTime<Utc>>>,
    active_connections: Arc<AtomicUsize>,
    clients: ClientRegistry,
}

impl LiveState {
    pub fn new(
        buffer: Arc<FragmentBuffer>,
        mode: StreamingMode,
        client_expiry_secs: u64,
    ) -> Arc<Self> {
        let streaming_since = buffer.is_enabled().then(Utc::now);
        Arc::new(Self {
            buffer,
            recording: RwLock::new(None),
            mode: RwLock::new(mode),
            streaming_since: RwLock::new(streaming_since),
            active_connections: Arc::new(AtomicUsize::new(0)),
            clients: ClientRegistry::new(client_expiry_secs),
        })
    }

    pub fn buffer(&self) -> &Arc<FragmentBuffer> {
        &self.buffer
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn is_enabled(&self) -> bool {
        self.buffer.is_enabled()
    }

    /// Enable or disable streaming.
    ///
    /// Disabling drops all buffered data and client metrics. Repeating the
    /// current value changes nothing.
    pub fn set_enabled(&self, enabled: bool) {
        if self.buffer.is_enabled() == enabled {
            return;
        }

        self.buffer.set_enabled(enabled);
        if enabled {
            *self.streaming_since.write() = Some(Utc::now());
        } else {
            *self.streaming_since.write() = None;
            self.clients.clear();
        }
        tracing::info!(enabled, "Streaming toggled");
    }

    pub fn mode(&self) -> StreamingMode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: StreamingMode) {
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous != mode {
            tracing::info!(from = %previous, to = %mode, "Streaming mode changed");
        }
    }

    /// Begin a recording session fed from `source`.
    ///
    /// A different source starts from an empty buffer; restarting the
    /// current source keeps it. Returns `None` while streaming is disabled.
    pub fn start_recording(&self, source: &str) -> Option<Uuid> {
        if !self.buffer.is_enabled() {
            tracing::warn!(source, "Recording start ignored, streaming disabled");
            return None;
        }

        let mut recording = self.recording.write();
        if let Some(session) = recording.as_ref() {
            if session.source == source {
                tracing::debug!(session_id = %session.id, "Recording already active");
                return Some(session.id);
            }
        }

        self.buffer.reset();
        let session = RecordingSession::new(source);
        let id = session.id;
        tracing::info!(session_id = %id, source, "Recording started");
        *recording = Some(session);
        Some(id)
    }

    /// End the active recording. Buffered fragments stay available.
    pub fn stop_recording(&self) -> Option<RecordingSession> {
        let session = self.recording.write().take();
        if let Some(session) = &session {
            tracing::info!(
                session_id = %session.id,
                duration_secs = (Utc::now() - session.started_at).num_seconds(),
                "Recording stopped"
            );
        }
        session
    }

    pub fn is_recording(&self) -> bool {
        self.recording.read().is_some()
    }

    pub fn recording(&self) -> Option<RecordingSession> {
        self.recording.read().clone()
    }

    /// Count a response in flight until the guard is dropped.
    pub fn connection_guard(&self) -> ConnectionGuard {
        ConnectionGuard::new(self.active_connections.clone())
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> i64 {
        self.streaming_since
            .read()
            .map(|since| (Utc::now() - since).num_seconds())
            .unwrap_or(0)
    }

    pub fn streaming_state(&self, min_ready: usize) -> StreamingState {
        let stats = self.buffer.stats();
        StreamingState::derive(
            stats.enabled,
            self.is_recording(),
            stats.has_init_segment,
            stats.buffered_count,
            min_ready,
        )
    }

    /// Assemble the `/status` body.
    pub fn status_report(&self, min_ready: usize) -> StatusReport {
        let stats = self.buffer.stats();
        let is_recording = self.is_recording();
        let state = StreamingState::derive(
            stats.enabled,
            is_recording,
            stats.has_init_segment,
            stats.buffered_count,
            min_ready,
        );

        StatusReport {
            streaming: stats.enabled,
            mode: self.mode(),
            state,
            message: state.message(stats.buffered_count, min_ready),
            is_recording,
            fragments_buffered: stats.buffered_count,
            buffer_size_mb: bytes_to_mb(stats.total_bytes),
            latest_sequence: stats.window.latest,
            oldest_sequence: stats.window.oldest,
            active_connections: self.active_connections(),
            has_init_segment: stats.has_init_segment,
            uptime_seconds: self.uptime_seconds(),
            ingest_gaps: stats.gap_count,
            total_data_transferred_mb: bytes_to_mb(self.clients.total_bytes()),
            clients: self.clients.snapshot(),
            events: self.clients.recent_events(STATUS_EVENTS),
        }
    }
}

/// Increments the active connection counter; decrements on drop.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
