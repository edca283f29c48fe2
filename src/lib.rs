//! Liverelay - in-memory live fMP4 to HLS relay
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod ingest;
pub mod server;
pub mod state;
