//! cmafplay - CMAF/fMP4 streaming playback toolkit
//!
//! The binary wraps three things around the `cmafplay-media` and
//! `cmafplay-playback` crates: a CORS-enabled static server for local
//! HLS/DASH media, a synthetic stream generator, and a headless player.
//! This library crate exposes them for integration testing.

pub mod config;
pub mod generate;
pub mod server;
