//! HLS playlists.
//!
//! Parsing resolves a playlist into init/segment/variant URLs; rendering
//! writes the playlists served for generated streams.

mod parser;
mod playlist;

pub use parser::{parse, Playlist, Variant};
pub use playlist::{MasterPlaylist, MediaPlaylist, SegmentEntry, StreamInfo};
