//! Fixed-capacity ring buffer of recent fMP4 fragments.
//!
//! The buffer holds the current initialization segment plus the newest
//! fragments of the live session, windowed by sequence number. There is a
//! single writer (the ingest source) and any number of readers (HTTP
//! handlers), coordinated through one reader/writer lock.
//!
//! # Window
//!
//! The valid window is `[oldest, latest]` with
//! `oldest = max(1, latest - capacity + 1)`. A fragment outside the window is
//! absent even when a stale copy still occupies its slot, so every read path
//! checks the window before touching a slot.
//!
//! # Failure semantics
//!
//! Nothing here returns an error to the writer. Late, duplicate or
//! out-of-order input is absorbed and logged so the live feed keeps running.

mod types;

pub use types::{
    BufferSnapshot, BufferStats, BufferWindow, FragmentRecord, InitializationSegment,
    LookupError, StreamingState,
};

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;

/// Default number of ring slots (~15 s of 1 s fragments).
pub const DEFAULT_CAPACITY: usize = 15;

/// Result of handing a fragment to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored in its slot.
    Accepted,
    /// Stored, but the sequence did not follow the previous one.
    AcceptedWithGap { expected: u64 },
    /// Dropped without touching the buffer.
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Disabled,
    ZeroSequence,
}

struct Inner {
    enabled: bool,
    slots: Vec<Option<Arc<FragmentRecord>>>,
    init_segment: Option<InitializationSegment>,
    window: BufferWindow,
    generation: u64,
    gap_count: u64,
}

impl Inner {
    fn clear(&mut self) -> usize {
        let mut cleared = 0;
        for slot in self.slots.iter_mut() {
            if slot.take().is_some() {
                cleared += 1;
            }
        }
        self.init_segment = None;
        self.window = BufferWindow::EMPTY;
        cleared
    }

    fn in_window(&self) -> impl Iterator<Item = &Arc<FragmentRecord>> {
        let window = self.window;
        self.slots
            .iter()
            .flatten()
            .filter(move |fragment| window.contains(fragment.sequence))
    }
}

/// Thread-safe fragment ring buffer.
pub struct FragmentBuffer {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl FragmentBuffer {
    /// Create a disabled buffer with `capacity` slots.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "fragment buffer capacity must be non-zero");
        Self {
            capacity,
            inner: RwLock::new(Inner {
                enabled: false,
                slots: vec![None; capacity],
                init_segment: None,
                window: BufferWindow::EMPTY,
                generation: 0,
                gap_count: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.read().enabled
    }

    /// Enable or disable ingestion and serving.
    ///
    /// Disabling drops every fragment and the init segment. Repeating the
    /// current setting has no effect.
    pub fn set_enabled(&self, enabled: bool) {
        let cleared = {
            let mut inner = self.inner.write();
            if inner.enabled == enabled {
                return;
            }
            inner.enabled = enabled;
            if enabled {
                None
            } else {
                Some(inner.clear())
            }
        };

        match cleared {
            None => tracing::info!("Live streaming enabled"),
            Some(count) => tracing::info!(cleared = count, "Live streaming disabled, buffer cleared"),
        }
    }

    /// Store a new initialization segment and start a fresh session.
    ///
    /// Every buffered fragment is discarded, including ones still inside the
    /// nominal window, and the window resets to `(1, 0)`.
    pub fn on_init_segment(&self, payload: Bytes) {
        let size = payload.len();
        let outcome = {
            let mut inner = self.inner.write();
            if !inner.enabled {
                None
            } else {
                let cleared = inner.clear();
                inner.generation += 1;
                let generation = inner.generation;
                inner.init_segment = Some(InitializationSegment {
                    payload,
                    received_at: Utc::now(),
                    generation,
                });
                Some((cleared, generation))
            }
        };

        match outcome {
            None => tracing::debug!(size, "Init segment ignored while streaming is disabled"),
            Some((cleared, generation)) => {
                if cleared > 0 {
                    tracing::info!(cleared, "Discarded fragments from previous session");
                }
                tracing::info!(size, generation, "Initialization segment stored");
            }
        }
    }

    /// Accept a completed fragment.
    ///
    /// Non-contiguous sequence numbers are logged and still stored in their
    /// natural slot `sequence % capacity`.
    pub fn on_fragment_complete(&self, sequence: u64, payload: Bytes) -> IngestOutcome {
        if sequence == 0 {
            tracing::warn!("Fragment with sequence 0 dropped");
            return IngestOutcome::Ignored(IgnoreReason::ZeroSequence);
        }

        let size = payload.len();
        let (outcome, evicted, purged, window) = {
            let mut inner = self.inner.write();
            if !inner.enabled {
                return IngestOutcome::Ignored(IgnoreReason::Disabled);
            }

            let previous = inner.window.latest;
            let expected = previous.checked_add(1);
            let outcome = match expected {
                Some(expected) if previous > 0 && sequence != expected => {
                    inner.gap_count += 1;
                    IngestOutcome::AcceptedWithGap { expected }
                }
                None => {
                    inner.gap_count += 1;
                    IngestOutcome::AcceptedWithGap { expected: previous }
                }
                _ => IngestOutcome::Accepted,
            };

            let slot = (sequence % self.capacity as u64) as usize;
            let record = Arc::new(FragmentRecord::new(sequence, payload));
            let evicted = inner.slots[slot]
                .replace(record)
                .map(|old| old.sequence)
                .filter(|old| *old != sequence);

            inner.window = BufferWindow::ending_at(sequence, self.capacity);

            // Ring wrap and window advance diverge once gaps occur.
            let oldest = inner.window.oldest;
            let mut purged = 0;
            for entry in inner.slots.iter_mut() {
                if entry.as_ref().is_some_and(|f| f.sequence < oldest) {
                    *entry = None;
                    purged += 1;
                }
            }

            (outcome, evicted, purged, inner.window)
        };

        if let IngestOutcome::AcceptedWithGap { expected } = outcome {
            tracing::warn!(
                expected,
                incoming = sequence,
                "Fragment sequence gap (possible encoder restart)"
            );
        }
        tracing::trace!(
            sequence,
            size,
            evicted = ?evicted,
            purged,
            oldest = window.oldest,
            latest = window.latest,
            "Fragment buffered"
        );

        outcome
    }

    /// Fetch a fragment by sequence number.
    pub fn get_fragment(&self, sequence: u64) -> Option<Arc<FragmentRecord>> {
        match self.lookup(sequence) {
            Ok(fragment) => Some(fragment),
            Err(reason) => {
                tracing::debug!(sequence, %reason, "Fragment lookup rejected");
                None
            }
        }
    }

    /// Fetch a fragment, reporting why it is unavailable.
    ///
    /// The window check runs first, against the same lock acquisition that
    /// performs the slot read.
    pub fn lookup(&self, sequence: u64) -> Result<Arc<FragmentRecord>, LookupError> {
        let inner = self.inner.read();
        if let Some(reason) = LookupError::outside(inner.window, sequence) {
            return Err(reason);
        }

        let slot = (sequence % self.capacity as u64) as usize;
        match &inner.slots[slot] {
            Some(fragment) if fragment.sequence == sequence => Ok(Arc::clone(fragment)),
            _ => Err(LookupError::Evicted(sequence)),
        }
    }

    /// Fragments inside the window, ascending by sequence number.
    pub fn buffered_fragments(&self) -> Vec<Arc<FragmentRecord>> {
        let inner = self.inner.read();
        sorted(inner.in_window().cloned().collect())
    }

    pub fn window(&self) -> BufferWindow {
        self.inner.read().window
    }

    pub fn init_segment(&self) -> Option<InitializationSegment> {
        self.inner.read().init_segment.clone()
    }

    /// Drop all content but keep the enabled flag.
    pub fn reset(&self) {
        let cleared = self.inner.write().clear();
        tracing::debug!(cleared, "Fragment buffer reset");
    }

    /// Everything the playlist generator needs, read under one lock.
    pub fn snapshot(&self) -> BufferSnapshot {
        let inner = self.inner.read();
        BufferSnapshot {
            enabled: inner.enabled,
            init_segment: inner.init_segment.clone(),
            fragments: sorted(inner.in_window().cloned().collect()),
            window: inner.window,
        }
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.read();
        let (buffered_count, total_bytes) = inner
            .in_window()
            .fold((0usize, 0u64), |(count, bytes), f| {
                (count + 1, bytes + f.size_bytes as u64)
            });

        BufferStats {
            enabled: inner.enabled,
            has_init_segment: inner.init_segment.is_some(),
            buffered_count,
            total_bytes,
            window: inner.window,
            gap_count: inner.gap_count,
        }
    }
}

impl Default for FragmentBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn sorted(mut fragments: Vec<Arc<FragmentRecord>>) -> Vec<Arc<FragmentRecord>> {
    fragments.sort_by_key(|f| f.sequence);
    fragments
}
