//! HLS playlist rendering.

use std::fmt;

/// Media playlist for a single fMP4 rendition.
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    /// Target duration in seconds.
    pub target_duration: u32,
    /// Media sequence number.
    pub media_sequence: u32,
    /// Init segment URI.
    pub init_uri: Option<String>,
    /// Segment entries.
    pub segments: Vec<SegmentEntry>,
    /// Whether this is an ended playlist.
    pub ended: bool,
}

impl MediaPlaylist {
    /// Create an empty VOD playlist.
    pub fn vod() -> Self {
        Self {
            target_duration: 0,
            media_sequence: 0,
            init_uri: None,
            segments: Vec::new(),
            ended: true,
        }
    }

    /// Append a segment, growing the target duration to cover it.
    pub fn push_segment(&mut self, uri: impl Into<String>, duration: f64) {
        self.target_duration = self.target_duration.max(duration.ceil() as u32);
        self.segments.push(SegmentEntry {
            duration,
            uri: uri.into(),
        });
    }

    /// Render to M3U8 text.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MediaPlaylist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#EXTM3U")?;
        writeln!(f, "#EXT-X-VERSION:7")?;
        writeln!(f, "#EXT-X-TARGETDURATION:{}", self.target_duration)?;
        writeln!(f, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence)?;
        if self.ended {
            writeln!(f, "#EXT-X-PLAYLIST-TYPE:VOD")?;
        }
        writeln!(f, "#EXT-X-INDEPENDENT-SEGMENTS")?;

        if let Some(ref init_uri) = self.init_uri {
            writeln!(f, "#EXT-X-MAP:URI=\"{}\"", init_uri)?;
        }

        for segment in &self.segments {
            writeln!(f, "#EXTINF:{:.6},", segment.duration)?;
            writeln!(f, "{}", segment.uri)?;
        }

        if self.ended {
            writeln!(f, "#EXT-X-ENDLIST")?;
        }
        Ok(())
    }
}

/// A segment entry in a media playlist.
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    /// Duration in seconds.
    pub duration: f64,
    /// Segment URI.
    pub uri: String,
}

/// Master playlist listing variant streams.
#[derive(Debug, Clone, Default)]
pub struct MasterPlaylist {
    pub streams: Vec<StreamInfo>,
}

impl MasterPlaylist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stream variant.
    pub fn add_stream(mut self, stream: StreamInfo) -> Self {
        self.streams.push(stream);
        self
    }

    /// Render to M3U8 text.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MasterPlaylist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#EXTM3U")?;
        writeln!(f, "#EXT-X-VERSION:6")?;

        for stream in &self.streams {
            write!(
                f,
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
                stream.bandwidth, stream.width, stream.height
            )?;
            if !stream.codecs.is_empty() {
                write!(f, ",CODECS=\"{}\"", stream.codecs)?;
            }
            writeln!(f)?;
            writeln!(f, "{}", stream.uri)?;
        }
        Ok(())
    }
}

/// Stream variant information.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Playlist URI.
    pub uri: String,
    /// Bandwidth in bits per second.
    pub bandwidth: u64,
    pub width: u16,
    pub height: u16,
    /// Codec list (e.g., "avc1.64001f,mp4a.40.2").
    pub codecs: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::parse;
    use url::Url;

    #[test]
    fn test_media_playlist_render() {
        let mut playlist = MediaPlaylist::vod();
        playlist.init_uri = Some("init.mp4".to_string());
        playlist.push_segment("seg0.m4s", 5.5);
        playlist.push_segment("seg1.m4s", 6.0);

        let m3u8 = playlist.render();

        assert!(m3u8.starts_with("#EXTM3U\n"));
        assert!(m3u8.contains("#EXT-X-TARGETDURATION:6"));
        assert!(m3u8.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(m3u8.contains("#EXT-X-MAP:URI=\"init.mp4\""));
        assert!(m3u8.contains("#EXTINF:5.500000,\nseg0.m4s\n"));
        assert!(m3u8.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn test_rendered_playlists_parse_back() {
        let base = Url::parse("http://localhost:8081/stream/master.m3u8").unwrap();
        let master = MasterPlaylist::new().add_stream(StreamInfo {
            uri: "media.m3u8".to_string(),
            bandwidth: 1_500_000,
            width: 1280,
            height: 720,
            codecs: "avc1.42E01E,mp4a.40.2".to_string(),
        });
        let parsed = parse(&master.render(), &base).unwrap();
        assert!(parsed.is_master());
        assert_eq!(parsed.variants[0].url.as_str(), "http://localhost:8081/stream/media.m3u8");
        assert_eq!(parsed.variants[0].bandwidth, Some(1_500_000));

        let mut media = MediaPlaylist::vod();
        media.init_uri = Some("init.mp4".to_string());
        media.push_segment("seg1.m4s", 2.0);
        let parsed = parse(&media.render(), &base).unwrap();
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.segments[0].duration, Some(2.0));
    }
}
