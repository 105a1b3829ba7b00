//! Manifest URL resolution.
//!
//! Absolute references pass through, root-relative ones (`/x`) resolve
//! against the origin, and anything else against the base's directory.
//! These are the RFC 3986 rules, so `Url::join` does the work.

use url::Url;

use crate::Result;

/// Resolve a manifest reference against the manifest (or BaseURL) location.
pub fn resolve(base: &Url, reference: &str) -> Result<Url> {
    Ok(base.join(reference.trim())?)
}

/// Treat `url` as a directory so relative references land inside it.
pub fn as_directory(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
