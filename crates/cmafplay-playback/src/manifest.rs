//! Manifest loading: fetch, detect the format, and resolve master playlists.

use cmafplay_media::{dash, hls, SegmentRef};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::fetch::Fetcher;
use crate::{Error, Result};

/// Streaming manifest format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Hls,
    Dash,
}

impl ManifestKind {
    /// Select the format from the URL path extension.
    pub fn detect(url: &Url) -> Option<Self> {
        let path = url.path().to_ascii_lowercase();
        if path.ends_with(".m3u8") {
            Some(Self::Hls)
        } else if path.ends_with(".mpd") {
            Some(Self::Dash)
        } else {
            None
        }
    }

    /// Select the format from the document itself.
    pub fn sniff(text: &str) -> Option<Self> {
        let head = text.trim_start_matches('\u{feff}').trim_start();
        if head.starts_with("#EXTM3U") {
            Some(Self::Hls)
        } else if head.starts_with('<') && head.contains("<MPD") {
            Some(Self::Dash)
        } else {
            None
        }
    }
}

/// The segment list a session plays, whatever format it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub kind: ManifestKind,
    /// URL the segment list was read from, after master-playlist resolution.
    pub url: Url,
    pub init_segment: Option<Url>,
    pub segments: Vec<SegmentRef>,
    /// MIME hint, only reported by DASH.
    pub mime_type: Option<String>,
}

/// Fetch and parse a manifest of either format.
///
/// The format comes from the URL extension, falling back to the document
/// content.
pub async fn load_manifest(
    fetcher: &dyn Fetcher,
    url: &Url,
    max_variant_depth: usize,
    cancel: &CancellationToken,
) -> Result<Manifest> {
    let text = fetcher.fetch_text(url, cancel).await?;
    let kind = ManifestKind::detect(url)
        .or_else(|| ManifestKind::sniff(&text))
        .ok_or_else(|| Error::manifest(format!("unrecognized manifest format: {url}")))?;

    match kind {
        ManifestKind::Hls => resolve_hls(fetcher, url.clone(), text, max_variant_depth, cancel).await,
        ManifestKind::Dash => parse_dash(&text, url),
    }
}

/// Fetch an HLS playlist, following master playlists to their first variant.
pub async fn load_hls(
    fetcher: &dyn Fetcher,
    url: &Url,
    max_variant_depth: usize,
    cancel: &CancellationToken,
) -> Result<Manifest> {
    let text = fetcher.fetch_text(url, cancel).await?;
    resolve_hls(fetcher, url.clone(), text, max_variant_depth, cancel).await
}

/// Fetch and parse a DASH MPD.
pub async fn load_dash(fetcher: &dyn Fetcher, url: &Url, cancel: &CancellationToken) -> Result<Manifest> {
    let text = fetcher.fetch_text(url, cancel).await?;
    parse_dash(&text, url)
}

async fn resolve_hls(
    fetcher: &dyn Fetcher,
    mut url: Url,
    mut text: String,
    max_variant_depth: usize,
    cancel: &CancellationToken,
) -> Result<Manifest> {
    let mut depth = 0;
    loop {
        let playlist = hls::parse(&text, &url)?;
        if !playlist.is_master() {
            tracing::debug!(
                %url,
                segments = playlist.segments.len(),
                init = playlist.init_segment.is_some(),
                "media playlist"
            );
            return Ok(Manifest {
                kind: ManifestKind::Hls,
                url,
                init_segment: playlist.init_segment,
                segments: playlist.segments,
                mime_type: None,
            });
        }

        if depth >= max_variant_depth {
            return Err(Error::manifest(format!(
                "master playlist nesting exceeds {max_variant_depth} levels at {url}"
            )));
        }
        depth += 1;

        // Variant selection is not implemented; the first listed variant plays.
        let variant = &playlist.variants[0];
        tracing::info!(
            variant = %variant.url,
            bandwidth = ?variant.bandwidth,
            codecs = ?variant.codecs,
            "following master playlist variant"
        );
        url = variant.url.clone();
        text = fetcher.fetch_text(&url, cancel).await?;
    }
}

fn parse_dash(text: &str, url: &Url) -> Result<Manifest> {
    let mpd = dash::parse(text, url)?;
    tracing::debug!(
        %url,
        segments = mpd.segments.len(),
        mime_type = %mpd.mime_type,
        "MPD"
    );
    Ok(Manifest {
        kind: ManifestKind::Dash,
        url: url.clone(),
        init_segment: mpd.init_segment,
        segments: mpd.segments,
        mime_type: Some(mpd.mime_type),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpFetcher;
    use assert_matches::assert_matches;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MEDIA: &str = "#EXTM3U\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:4,\nseg1.m4s\n#EXTINF:4,\nseg2.m4s\n";

    async fn serve(server: &MockServer, p: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn at(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[test]
    fn test_detect_by_extension() {
        let hls = Url::parse("http://h/a/master.M3U8?token=1").unwrap();
        let dash = Url::parse("http://h/a/stream.mpd").unwrap();
        let other = Url::parse("http://h/a/stream").unwrap();
        assert_eq!(ManifestKind::detect(&hls), Some(ManifestKind::Hls));
        assert_eq!(ManifestKind::detect(&dash), Some(ManifestKind::Dash));
        assert_eq!(ManifestKind::detect(&other), None);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(ManifestKind::sniff("\n#EXTM3U\n"), Some(ManifestKind::Hls));
        assert_eq!(
            ManifestKind::sniff("<?xml version=\"1.0\"?>\n<MPD/>"),
            Some(ManifestKind::Dash)
        );
        assert_eq!(ManifestKind::sniff("hello"), None);
    }

    #[tokio::test]
    async fn test_load_media_playlist() {
        let server = MockServer::start().await;
        serve(&server, "/path/media.m3u8", MEDIA).await;

        let manifest = load_manifest(
            &HttpFetcher::default(),
            &at(&server, "/path/media.m3u8"),
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(manifest.kind, ManifestKind::Hls);
        assert_eq!(manifest.init_segment, Some(at(&server, "/path/init.mp4")));
        assert_eq!(manifest.segments.len(), 2);
        assert_eq!(manifest.segments[1].url, at(&server, "/path/seg2.m4s"));
        assert_eq!(manifest.segments[1].duration, Some(4.0));
    }

    #[tokio::test]
    async fn test_master_playlist_follows_first_variant() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000,CODECS=\"avc1.42E01E\"\nv0/media.m3u8\n",
        )
        .await;
        serve(&server, "/v0/media.m3u8", MEDIA).await;

        let manifest = load_hls(
            &HttpFetcher::default(),
            &at(&server, "/master.m3u8"),
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(manifest.url, at(&server, "/v0/media.m3u8"));
        assert_eq!(manifest.init_segment, Some(at(&server, "/v0/init.mp4")));
        assert_eq!(manifest.segments[0].url, at(&server, "/v0/seg1.m4s"));
    }

    #[tokio::test]
    async fn test_self_referencing_master_is_bounded() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/loop.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nloop.m3u8\n",
        )
        .await;

        let err = load_hls(
            &HttpFetcher::default(),
            &at(&server, "/loop.m3u8"),
            3,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Manifest(msg) if msg.contains("3 levels"));
    }

    #[tokio::test]
    async fn test_load_dash_template() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/dash/stream.mpd",
            r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011">
  <Period duration="PT20S">
    <AdaptationSet mimeType="video/mp4">
      <Representation id="v0" bandwidth="800000" codecs="avc1.64001F">
        <SegmentTemplate initialization="init.mp4" media="seg-$Number%03d$.m4s"
                         startNumber="1" duration="4" timescale="1"/>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#,
        )
        .await;

        let manifest = load_manifest(
            &HttpFetcher::default(),
            &at(&server, "/dash/stream.mpd"),
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(manifest.kind, ManifestKind::Dash);
        assert_eq!(manifest.init_segment, Some(at(&server, "/dash/init.mp4")));
        assert_eq!(manifest.segments.len(), 5);
        assert_eq!(manifest.segments[4].url, at(&server, "/dash/seg-005.m4s"));
        assert_eq!(
            manifest.mime_type.as_deref(),
            Some("video/mp4; codecs=\"avc1.64001F\"")
        );
    }

    #[tokio::test]
    async fn test_unknown_format_is_manifest_error() {
        let server = MockServer::start().await;
        serve(&server, "/stream", "not a manifest").await;

        let err = load_manifest(
            &HttpFetcher::default(),
            &at(&server, "/stream"),
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Manifest(_));
    }

    #[tokio::test]
    async fn test_manifest_404_is_fetch_error() {
        let server = MockServer::start().await;
        let err = load_manifest(
            &HttpFetcher::default(),
            &at(&server, "/gone.m3u8"),
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Fetch { status: 404, .. });
    }
}
