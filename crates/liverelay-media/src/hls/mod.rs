//! HLS playlist generation.
//!
//! Builds the live media playlist served at `/live.m3u8` from a buffer
//! snapshot. The playlist is recomputed for every request.

mod playlist;

pub use playlist::{segment_uri, LiveEntry, LivePlaylist, PlaylistOptions, Unavailable};
