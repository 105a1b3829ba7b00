//! Line-oriented M3U8 parsing.

use url::Url;

use crate::resolve::resolve;
use crate::{Result, SegmentRef};

const EXT_X_MAP: &str = "#EXT-X-MAP:";
const EXT_X_STREAM_INF: &str = "#EXT-X-STREAM-INF:";
const EXTINF: &str = "#EXTINF:";

/// A variant stream listed in a master playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub url: Url,
    /// Kept for diagnostics; no selection is made on it.
    pub bandwidth: Option<u64>,
    pub codecs: Option<String>,
}

/// Result of parsing one playlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playlist {
    /// `#EXT-X-MAP` URI.
    pub init_segment: Option<Url>,
    /// Media segments in playlist order.
    pub segments: Vec<SegmentRef>,
    /// Variant playlists in playlist order.
    pub variants: Vec<Variant>,
}

impl Playlist {
    /// A master playlist lists variants but no media segments.
    pub fn is_master(&self) -> bool {
        self.segments.is_empty() && !self.variants.is_empty()
    }
}

enum Pending {
    Segment(Option<f64>),
    Variant(Option<u64>, Option<String>),
}

/// Parse M3U8 text; relative URIs resolve against `base`.
///
/// A URI line is only taken when an `#EXTINF` or `#EXT-X-STREAM-INF` tag
/// precedes it; other tags between the two are skipped.
pub fn parse(text: &str, base: &Url) -> Result<Playlist> {
    let mut playlist = Playlist::default();
    let mut pending = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(attrs) = line.strip_prefix(EXT_X_MAP) {
            if let Some((_, uri)) = attributes(attrs).find(|(k, _)| *k == "URI") {
                playlist.init_segment = Some(resolve(base, uri)?);
            }
        } else if let Some(attrs) = line.strip_prefix(EXT_X_STREAM_INF) {
            let mut bandwidth = None;
            let mut codecs = None;
            for (key, value) in attributes(attrs) {
                match key {
                    "BANDWIDTH" => bandwidth = value.parse().ok(),
                    "CODECS" => codecs = Some(value.to_string()),
                    _ => {}
                }
            }
            pending = Some(Pending::Variant(bandwidth, codecs));
        } else if let Some(info) = line.strip_prefix(EXTINF) {
            let duration = info
                .split(',')
                .next()
                .and_then(|d| d.trim().parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d >= 0.0);
            pending = Some(Pending::Segment(duration));
        } else if line.starts_with('#') {
            continue;
        } else {
            match pending.take() {
                Some(Pending::Segment(duration)) => playlist.segments.push(SegmentRef {
                    url: resolve(base, line)?,
                    duration,
                }),
                Some(Pending::Variant(bandwidth, codecs)) => playlist.variants.push(Variant {
                    url: resolve(base, line)?,
                    bandwidth,
                    codecs,
                }),
                None => tracing::debug!(line, "URI line without a preceding tag"),
            }
        }
    }

    Ok(playlist)
}

/// Split an attribute list (`KEY=value,KEY="quoted, value"`).
fn attributes(list: &str) -> impl Iterator<Item = (&str, &str)> {
    let mut rest = list;
    std::iter::from_fn(move || {
        rest = rest.trim_start_matches([',', ' ']);
        if rest.is_empty() {
            return None;
        }
        let eq = rest.find('=')?;
        let key = rest[..eq].trim();
        let after = &rest[eq + 1..];
        let (value, remainder) = match after.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(close) => (&quoted[..close], &quoted[close + 1..]),
                None => (quoted, ""),
            },
            None => match after.find(',') {
                Some(comma) => (&after[..comma], &after[comma..]),
                None => (after, ""),
            },
        };
        rest = remainder;
        Some((key, value))
    })
}
