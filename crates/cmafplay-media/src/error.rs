//! Error types for cmafplay-media.

use thiserror::Error;

/// Result type for cmafplay-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cmafplay-media operations.
///
/// Parsers prefer empty or partial results over errors; these variants are
/// only produced when the top-level contract of an operation cannot be met.
#[derive(Debug, Error)]
pub enum Error {
    /// A box the operation cannot work without is absent.
    #[error("Missing required box: {0}")]
    MissingBox(&'static str),

    /// Manifest structure could not be interpreted.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// MPD document is not well-formed XML.
    #[error("Invalid MPD XML: {0}")]
    Xml(#[from] roxmltree::Error),

    /// A manifest URL could not be parsed or resolved.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Create an invalid manifest error.
    pub fn invalid_manifest(msg: impl Into<String>) -> Self {
        Self::InvalidManifest(msg.into())
    }
}
