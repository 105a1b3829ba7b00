//! Static MPD rendering for SegmentTemplate-addressed streams.

use std::fmt;

/// A single-representation, number-addressed on-demand MPD.
#[derive(Debug, Clone)]
pub struct TemplateMpd {
    pub representation_id: String,
    pub bandwidth: u64,
    pub width: u16,
    pub height: u16,
    /// Codec list for the representation, e.g. `avc1.42E01E,mp4a.40.2`.
    pub codecs: String,
    pub timescale: u32,
    /// Segment duration in timescale ticks.
    pub segment_duration: u64,
    pub start_number: u64,
    pub initialization: String,
    pub media: String,
    /// Presentation duration in seconds.
    pub duration_secs: f64,
}

/// Render an MPD document for `mpd`.
pub fn render_template_mpd(mpd: &TemplateMpd) -> String {
    mpd.to_string()
}

impl fmt::Display for TemplateMpd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let duration = format!("PT{:.3}S", self.duration_secs);
        writeln!(f, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(
            f,
            r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" profiles="urn:mpeg:dash:profile:isoff-on-demand:2011" type="static" minBufferTime="PT2S" mediaPresentationDuration="{}">"#,
            duration
        )?;
        writeln!(f, r#"  <Period id="0" duration="{}">"#, duration)?;
        writeln!(
            f,
            r#"    <AdaptationSet mimeType="video/mp4" segmentAlignment="true" startWithSAP="1">"#
        )?;
        writeln!(
            f,
            r#"      <Representation id="{}" codecs="{}" bandwidth="{}" width="{}" height="{}">"#,
            xml_escape(&self.representation_id),
            xml_escape(&self.codecs),
            self.bandwidth,
            self.width,
            self.height
        )?;
        writeln!(
            f,
            r#"        <SegmentTemplate timescale="{}" duration="{}" startNumber="{}" initialization="{}" media="{}"/>"#,
            self.timescale,
            self.segment_duration,
            self.start_number,
            xml_escape(&self.initialization),
            xml_escape(&self.media)
        )?;
        writeln!(f, "      </Representation>")?;
        writeln!(f, "    </AdaptationSet>")?;
        writeln!(f, "  </Period>")?;
        writeln!(f, "</MPD>")
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
