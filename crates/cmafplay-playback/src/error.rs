//! Error types for cmafplay-playback.

use thiserror::Error;

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for playback operations.
///
/// Everything except [`Error::Cancelled`] is a failure; cancellation is how a
/// session unwinds when its token fires and is never shown to the user.
#[derive(Debug, Error)]
pub enum Error {
    /// The platform decode service is not available.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The manifest could not be used.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    Fetch { url: String, status: u16 },

    /// The request failed before a response arrived.
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// Container or manifest parsing failed.
    #[error(transparent)]
    Media(#[from] cmafplay_media::Error),

    /// The manifest does not reference an init segment.
    #[error("No init segment in manifest")]
    MissingInitSegment,

    /// The init segment has no video track.
    #[error("No video track found in init segment")]
    NoUsableTrack,

    /// The decoder rejected its configuration.
    #[error("Decoder configuration rejected: {0}")]
    DecoderConfig(String),

    /// A submitted chunk failed to decode.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The session's cancellation token fired.
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Create an unsupported-platform error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a manifest error.
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    pub(crate) fn network(url: &url::Url, err: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The single message shown to a user when a session fails.
    ///
    /// Returns `None` for cancellation.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Cancelled => None,
            Self::Network { .. } => Some(format!(
                "{self}. The request may have been blocked by a cross-origin (CORS) policy; \
                 serve the stream with CORS headers, for example with `cmafplay serve`."
            )),
            Self::MissingInitSegment => Some(
                "No init segment. This HLS may use TS format instead of CMAF/fMP4; \
                 only fragmented MP4 streams are supported."
                    .to_string(),
            ),
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_has_no_user_message() {
        assert!(Error::Cancelled.is_cancelled());
        assert_eq!(Error::Cancelled.user_message(), None);
    }

    #[test]
    fn test_network_hint_mentions_cors() {
        let url = url::Url::parse("http://cdn.test/live.m3u8").unwrap();
        let message = Error::network(&url, "connection refused").user_message().unwrap();
        assert!(message.contains("http://cdn.test/live.m3u8"));
        assert!(message.contains("CORS"));
    }

    #[test]
    fn test_missing_init_hint_mentions_ts() {
        let message = Error::MissingInitSegment.user_message().unwrap();
        assert!(message.contains("TS format"));
    }

    #[test]
    fn test_other_errors_use_display() {
        let err = Error::Fetch {
            url: "http://cdn.test/init.mp4".into(),
            status: 404,
        };
        assert!(!err.is_cancelled());
        assert_eq!(
            err.user_message().as_deref(),
            Some("HTTP 404 fetching http://cdn.test/init.mp4")
        );
    }
}
