//! Live-edge HLS media playlist.

use std::fmt::Write;

use crate::buffer::BufferSnapshot;

/// Tunables for live playlist generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistOptions {
    /// Number of newest fragments to list.
    pub live_edge: usize,
    /// Minimum buffered fragments before a playlist is served.
    pub min_ready: usize,
    /// Value of `#EXT-X-TARGETDURATION` in whole seconds.
    pub target_duration: u32,
    /// Nominal duration of every fragment in seconds.
    pub fragment_duration: f64,
    /// URI of the initialization segment.
    pub init_uri: String,
}

impl Default for PlaylistOptions {
    fn default() -> Self {
        Self {
            live_edge: 5,
            min_ready: 2,
            target_duration: 4,
            fragment_duration: 1.0,
            init_uri: "/init.mp4".to_string(),
        }
    }
}

/// Why no playlist can be produced right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Unavailable {
    #[error("disabled")]
    Disabled,
    #[error("initializing")]
    Initializing,
    #[error("buffering, {ready}/{required} ready")]
    Buffering { ready: usize, required: usize },
}

impl Unavailable {
    /// Short machine-friendly reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Initializing => "initializing",
            Self::Buffering { .. } => "buffering",
        }
    }

    /// Operator-facing explanation used as the 503 body.
    pub fn message(&self) -> String {
        match self {
            Self::Disabled => "Streaming Disabled\n\n\
                Start recording with streaming enabled.\n\n\
                Check /status for current state."
                .to_string(),
            Self::Initializing => "Stream Initializing\n\n\
                Waiting for the initialization segment from the encoder.\n\n\
                Check /status for current state."
                .to_string(),
            Self::Buffering { ready, required } => format!(
                "Buffering stream... Please wait ({}/{} fragments ready)",
                ready, required
            ),
        }
    }
}

/// One `#EXTINF` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEntry {
    pub sequence: u64,
    pub duration: f64,
    pub uri: String,
}

/// Live media playlist covering the newest fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePlaylist {
    pub target_duration: u32,
    /// Sequence number of the first listed fragment.
    pub media_sequence: u64,
    pub init_uri: String,
    pub entries: Vec<LiveEntry>,
}

impl LivePlaylist {
    /// Build a playlist from a buffer snapshot.
    pub fn build(
        snapshot: &BufferSnapshot,
        options: &PlaylistOptions,
    ) -> Result<Self, Unavailable> {
        if !snapshot.enabled {
            return Err(Unavailable::Disabled);
        }
        if snapshot.init_segment.is_none() {
            return Err(Unavailable::Initializing);
        }

        let ready = snapshot.fragments.len();
        let required = options.min_ready.max(1);
        if ready < required {
            return Err(Unavailable::Buffering { ready, required });
        }

        let start = ready.saturating_sub(options.live_edge.max(1));
        let entries: Vec<LiveEntry> = snapshot.fragments[start..]
            .iter()
            .map(|fragment| LiveEntry {
                sequence: fragment.sequence,
                duration: options.fragment_duration,
                uri: segment_uri(fragment.sequence),
            })
            .collect();

        Ok(Self {
            target_duration: options.target_duration,
            media_sequence: entries[0].sequence,
            init_uri: options.init_uri.clone(),
            entries,
        })
    }

    /// Render to M3U8. Tag order matters to some players.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:7").unwrap();
        writeln!(out, "#EXT-X-INDEPENDENT-SEGMENTS").unwrap();
        writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration).unwrap();
        writeln!(out, "#EXT-X-MAP:URI=\"{}\"", self.init_uri).unwrap();
        writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence).unwrap();

        for entry in &self.entries {
            writeln!(out, "#EXTINF:{:.3},", entry.duration).unwrap();
            writeln!(out, "{}", entry.uri).unwrap();
        }

        out
    }

    pub fn first_sequence(&self) -> u64 {
        self.media_sequence
    }

    pub fn last_sequence(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.sequence)
            .unwrap_or(self.media_sequence)
    }
}

/// URI under which a fragment is served.
pub fn segment_uri(sequence: u64) -> String {
    format!("/seg-{}.m4s", sequence)
}
