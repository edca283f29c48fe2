//! Value types held and handed out by the fragment buffer.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A single fMP4 fragment (moof + mdat).
#[derive(Debug, Clone)]
pub struct FragmentRecord {
    /// Sequence number, unique within a session and starting at 1.
    pub sequence: u64,
    /// Raw moof+mdat bytes.
    pub payload: Bytes,
    /// When the fragment was accepted into the buffer.
    pub captured_at: DateTime<Utc>,
    /// Payload size in bytes.
    pub size_bytes: usize,
}

impl FragmentRecord {
    pub fn new(sequence: u64, payload: Bytes) -> Self {
        let size_bytes = payload.len();
        Self {
            sequence,
            payload,
            captured_at: Utc::now(),
            size_bytes,
        }
    }
}

/// Initialization segment (ftyp + moov) for the current session.
#[derive(Debug, Clone)]
pub struct InitializationSegment {
    /// Raw ftyp+moov bytes.
    pub payload: Bytes,
    /// When the segment was received.
    pub received_at: DateTime<Utc>,
    /// Session generation; increments on every session reset.
    pub generation: u64,
}

impl InitializationSegment {
    /// Whether the payload begins with an `ftyp` box header.
    pub fn has_ftyp(&self) -> bool {
        self.payload.len() >= 8 && &self.payload[4..8] == b"ftyp"
    }
}

/// Valid sequence window `[oldest, latest]`.
///
/// An empty window is represented as `(1, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferWindow {
    pub oldest: u64,
    pub latest: u64,
}

impl BufferWindow {
    pub const EMPTY: Self = Self {
        oldest: 1,
        latest: 0,
    };

    /// Window ending at `latest` for a ring of `capacity` slots.
    pub fn ending_at(latest: u64, capacity: usize) -> Self {
        let span = capacity as u64;
        Self {
            oldest: latest.saturating_sub(span.saturating_sub(1)).max(1),
            latest,
        }
    }

    pub fn contains(&self, sequence: u64) -> bool {
        sequence >= self.oldest && sequence <= self.latest
    }

    pub fn is_empty(&self) -> bool {
        self.latest < self.oldest
    }
}

impl Default for BufferWindow {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Why a fragment lookup came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// Requested sequence is older than the window start.
    #[error("fragment {requested} is stale (window starts at {oldest})")]
    Stale { requested: u64, oldest: u64 },

    /// Requested sequence has not been produced yet.
    #[error("fragment {requested} is in the future (latest is {latest})")]
    Future { requested: u64, latest: u64 },

    /// In the window but no longer resident.
    #[error("fragment {0} was already evicted")]
    Evicted(u64),
}

impl LookupError {
    /// Classify a sequence number that falls outside `window`.
    ///
    /// Returns `None` when the sequence is inside the window.
    pub fn outside(window: BufferWindow, requested: u64) -> Option<Self> {
        if requested < window.oldest {
            Some(Self::Stale {
                requested,
                oldest: window.oldest,
            })
        } else if requested > window.latest {
            Some(Self::Future {
                requested,
                latest: window.latest,
            })
        } else {
            None
        }
    }
}

/// Consistent view of the buffer taken under a single read lock.
#[derive(Debug, Clone, Default)]
pub struct BufferSnapshot {
    pub enabled: bool,
    pub init_segment: Option<InitializationSegment>,
    pub fragments: Vec<Arc<FragmentRecord>>,
    pub window: BufferWindow,
}

/// Counters describing the buffer contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub enabled: bool,
    pub has_init_segment: bool,
    pub buffered_count: usize,
    pub total_bytes: u64,
    pub window: BufferWindow,
    pub gap_count: u64,
}

/// Derived readiness of the live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
pub enum StreamingState {
    Disabled,
    NotRecording,
    Initializing,
    Buffering,
    Ready,
}

impl StreamingState {
    /// Compute the state from its inputs. Never stored.
    pub fn derive(
        enabled: bool,
        has_active_recording: bool,
        has_init_segment: bool,
        buffered_count: usize,
        min_ready: usize,
    ) -> Self {
        if !enabled {
            Self::Disabled
        } else if !has_active_recording {
            Self::NotRecording
        } else if !has_init_segment {
            Self::Initializing
        } else if buffered_count < min_ready {
            Self::Buffering
        } else {
            Self::Ready
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::NotRecording => "not_recording",
            Self::Initializing => "initializing",
            Self::Buffering => "buffering",
            Self::Ready => "ready",
        }
    }

    /// Human-readable description for operators.
    pub fn message(&self, buffered_count: usize, min_ready: usize) -> String {
        match self {
            Self::Disabled => {
                "Streaming is disabled. Start recording with streaming enabled.".to_string()
            }
            Self::NotRecording => {
                "Recording not started yet. Start recording to begin streaming.".to_string()
            }
            Self::Initializing => {
                "Recording started, waiting for initialization segment.".to_string()
            }
            Self::Buffering => format!(
                "Init segment ready, waiting for more fragments ({}/{} ready).",
                buffered_count, min_ready
            ),
            Self::Ready => "Stream is ready for playback.".to_string(),
        }
    }
}

impl std::fmt::Display for StreamingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
