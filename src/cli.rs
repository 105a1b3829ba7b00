use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cmafplay")]
#[command(author, version, about = "CMAF/fMP4 streaming playback toolkit")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve a media directory over HTTP with CORS and range support
    Serve {
        /// Port to listen on
        port: Option<u16>,

        /// Directory to serve
        directory: Option<PathBuf>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Play an HLS or DASH stream headlessly and print a report
    Play {
        /// Manifest URL (.m3u8 or .mpd)
        #[arg(required = true)]
        url: String,
    },

    /// Parse an init segment and optional media segments
    Probe {
        /// Init segment (ftyp + moov)
        #[arg(required = true)]
        init: PathBuf,

        /// Media segments (moof + mdat) to parse against the init segment
        segments: Vec<PathBuf>,
    },

    /// Write a synthetic CMAF stream with HLS and DASH manifests
    Generate {
        /// Output directory
        #[arg(required = true)]
        directory: PathBuf,

        /// Number of media segments
        #[arg(long, default_value = "5")]
        segments: u32,

        /// Segment duration in seconds
        #[arg(long, default_value = "2.0")]
        segment_duration: f64,

        /// Leave out the audio track
        #[arg(long)]
        no_audio: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },
}
