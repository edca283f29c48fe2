//! Liverelay-Media: live fMP4 fragment buffering and HLS playlist generation
//!
//! This crate holds the in-memory side of the live relay. An encoder pushes
//! an initialization segment followed by numbered fragments; HTTP handlers
//! read them back and ask for a live-edge playlist.
//!
//! # Modules
//!
//! - `buffer` - Ring buffer of recent fragments with a sliding sequence window
//! - `hls` - Live HLS playlist generation (m3u8)
//! - `fmp4` - Top-level box splitting of an fMP4 byte stream
//!
//! # Architecture
//!
//! The buffer is constructed once by the application and shared by `Arc`:
//!
//! 1. The ingest source calls `on_init_segment` once per session
//! 2. Each completed fragment goes through `on_fragment_complete`
//! 3. Playlist requests take a `snapshot` and render a `LivePlaylist`
//! 4. Segment requests validate against `window` and call `lookup`

pub mod buffer;
pub mod error;
pub mod fmp4;
pub mod hls;

pub use buffer::{
    BufferSnapshot, BufferStats, BufferWindow, FragmentBuffer, FragmentRecord, IngestOutcome,
    InitializationSegment, LookupError, StreamingState,
};
pub use error::{Error, Result};
pub use fmp4::{BoxSplitter, SplitEvent};
pub use hls::{LivePlaylist, PlaylistOptions, Unavailable};
