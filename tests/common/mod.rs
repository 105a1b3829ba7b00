//! Shared test infrastructure for integration tests.
//!
//! Provides a generated stream served over HTTP on a random port and a time
//! source that keeps every queued frame due.

#![allow(dead_code)]

use cmafplay::generate::{generate_stream, GenerateOptions, GeneratedStream};
use cmafplay::server::{create_router, ServeContext};
use cmafplay_playback::TimeSource;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use tempfile::TempDir;
use url::Url;

/// A generated stream behind a live server.
pub struct MediaServer {
    pub dir: TempDir,
    pub stream: GeneratedStream,
    pub addr: SocketAddr,
}

impl MediaServer {
    /// Generate a stream into a temp directory and serve it on a random port.
    pub async fn start(options: &GenerateOptions) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let stream = generate_stream(dir.path(), options).expect("failed to generate stream");

        let ctx = ServeContext::new(dir.path().to_path_buf(), 0).expect("failed to create context");
        let app = create_router(ctx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { dir, stream, addr }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}/{}", self.addr, path)).expect("invalid url")
    }
}

/// Small stream for fast tests.
pub fn short_stream(segments: u32, audio: bool) -> GenerateOptions {
    GenerateOptions {
        segments,
        segment_duration: 0.5,
        width: 320,
        height: 240,
        audio,
    }
}

/// Jumps a full second on every read so queued frames are always due.
#[derive(Default)]
pub struct FastForward(AtomicI64);

impl TimeSource for FastForward {
    fn now_us(&self) -> i64 {
        self.0.fetch_add(1_000_000, Ordering::Relaxed)
    }
}
