//! MPD parsing for a single, first-listed representation.

use roxmltree::{Document, Node};
use url::Url;

use super::template::{expand_template, parse_iso8601_duration, TemplateVars};
use crate::resolve::{as_directory, resolve};
use crate::{defaults, Error, Result, SegmentRef};

/// Guards against absurd template counts from a tiny `@duration`.
const MAX_TEMPLATE_SEGMENTS: u64 = 100_000;

/// Playable unit resolved from an MPD.
#[derive(Debug, Clone, PartialEq)]
pub struct DashManifest {
    pub init_segment: Option<Url>,
    pub segments: Vec<SegmentRef>,
    /// MIME type with codecs, e.g. `video/mp4; codecs="avc1.64001F"`.
    pub mime_type: String,
}

/// Parse MPD XML; relative URLs resolve against `base` and any `BaseURL`s.
///
/// The first `Representation` is used, or the first `AdaptationSet` when
/// there is none. `SegmentList` addressing is preferred over
/// `SegmentTemplate`; both may be inherited from an enclosing element.
pub fn parse(xml: &str, base: &Url) -> Result<DashManifest> {
    let doc = Document::parse(xml)?;
    let mpd = doc.root_element();

    let rep = first_element(mpd, "Representation")
        .or_else(|| first_element(mpd, "AdaptationSet"))
        .ok_or_else(|| Error::invalid_manifest("no Representation or AdaptationSet in MPD"))?;

    let rep_base = base_url(rep, base)?;
    let mime_type = mime_type(rep);
    let vars = TemplateVars {
        representation_id: rep.attribute("id").unwrap_or("0"),
        bandwidth: rep.attribute("bandwidth").and_then(|b| b.trim().parse().ok()),
        number: None,
    };

    let (init_segment, segments) = if let Some(list) = inherited_child(rep, "SegmentList") {
        segment_list(list, &rep_base)?
    } else if inherited_child(rep, "SegmentTemplate").is_some() {
        segment_template(rep, mpd, &rep_base, vars)?
    } else {
        tracing::warn!("MPD representation has no SegmentList or SegmentTemplate");
        (None, Vec::new())
    };

    Ok(DashManifest {
        init_segment,
        segments,
        mime_type,
    })
}

fn is_element(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn first_element<'a, 'input>(root: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    root.descendants().find(|n| is_element(n, name))
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is_element(n, name))
}

/// First `name` child of the node or of its nearest ancestor that has one.
fn inherited_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.ancestors().find_map(|n| child(n, name))
}

fn inherited_attribute<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.ancestors().find_map(|n| n.attribute(name))
}

/// Apply `BaseURL` elements from the MPD root down to `rep`, each one
/// relative to the one above it.
fn base_url(rep: Node, manifest: &Url) -> Result<Url> {
    let chain: Vec<Node> = rep.ancestors().filter(|n| n.is_element()).collect();
    let mut base = manifest.clone();
    for node in chain.into_iter().rev() {
        if let Some(text) = child(node, "BaseURL").and_then(|b| b.text()) {
            if !text.trim().is_empty() {
                base = as_directory(resolve(&base, text)?);
            }
        }
    }
    Ok(base)
}

fn mime_type(rep: Node) -> String {
    let mime = inherited_attribute(rep, "mimeType");
    let codecs = inherited_attribute(rep, "codecs");
    match (mime, codecs) {
        (None, None) => defaults::DASH_MIME_TYPE.to_string(),
        (mime, Some(codecs)) => format!("{}; codecs=\"{}\"", mime.unwrap_or("video/mp4"), codecs),
        (Some(mime), None) => mime.to_string(),
    }
}

fn segment_duration_secs(node: Node) -> Option<f64> {
    let duration: f64 = node.attribute("duration")?.trim().parse().ok()?;
    let timescale: f64 = node
        .attribute("timescale")
        .and_then(|t| t.trim().parse().ok())
        .unwrap_or(1.0);
    let secs = duration / timescale;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

fn segment_list(list: Node, base: &Url) -> Result<(Option<Url>, Vec<SegmentRef>)> {
    let init = child(list, "Initialization")
        .and_then(|init| init.attribute("sourceURL").or_else(|| init.attribute("range")))
        .map(|src| resolve(base, src))
        .transpose()?;

    let duration = segment_duration_secs(list);
    let segments = list
        .children()
        .filter(|n| is_element(n, "SegmentURL"))
        .map(|seg| {
            let href = seg
                .attribute("media")
                .or_else(|| seg.attribute("mediaURL"))
                .or_else(|| seg.attribute("href"))
                .unwrap_or("");
            Ok(SegmentRef {
                url: resolve(base, href)?,
                duration,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((init, segments))
}

fn segment_template(
    rep: Node,
    mpd: Node,
    base: &Url,
    vars: TemplateVars<'_>,
) -> Result<(Option<Url>, Vec<SegmentRef>)> {
    // Attributes may be split between templates at several levels.
    let templates: Vec<Node> = rep
        .ancestors()
        .filter_map(|n| child(n, "SegmentTemplate"))
        .collect();
    let attr = |name: &str| templates.iter().find_map(|t| t.attribute(name));

    let init = attr("initialization")
        .or_else(|| attr("sourceURL"))
        .map(|init| resolve(base, &expand_template(init, &vars)))
        .transpose()?;

    let Some(media) = attr("media") else {
        return Ok((init, Vec::new()));
    };

    let start_number: u64 = attr("startNumber")
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(1);
    let duration = attr("duration").and_then(|d| d.trim().parse::<f64>().ok());
    let timescale = attr("timescale")
        .and_then(|t| t.trim().parse::<f64>().ok())
        .unwrap_or(1.0);
    let segment_duration = duration
        .map(|d| d / timescale)
        .filter(|secs| secs.is_finite() && *secs > 0.0);
    let count = segment_count(rep, mpd, segment_duration);

    tracing::debug!(
        representation = vars.representation_id,
        start_number,
        count,
        ?segment_duration,
        media,
        "expanding SegmentTemplate"
    );

    let segments = (0..count)
        .map(|i| {
            let number = TemplateVars {
                number: Some(start_number + i),
                ..vars
            };
            Ok(SegmentRef {
                url: resolve(base, &expand_template(media, &number))?,
                duration: segment_duration,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((init, segments))
}

/// Segment count from the period (or presentation) duration, else the
/// fixed default. This is an approximation for templates without a timeline.
fn segment_count(rep: Node, mpd: Node, segment_duration: Option<f64>) -> u64 {
    let period_duration = rep
        .ancestors()
        .find(|n| is_element(n, "Period"))
        .and_then(|p| p.attribute("duration"))
        .and_then(parse_iso8601_duration);
    let total = period_duration.or_else(|| {
        mpd.attribute("mediaPresentationDuration")
            .and_then(parse_iso8601_duration)
    });

    match (total, segment_duration) {
        (Some(total), Some(segment)) => {
            let count = ((total / segment).ceil() as u64).max(1);
            if count > MAX_TEMPLATE_SEGMENTS {
                tracing::warn!(count, "SegmentTemplate count capped");
            }
            count.min(MAX_TEMPLATE_SEGMENTS)
        }
        _ => {
            tracing::warn!(
                default = defaults::DASH_SEGMENT_COUNT,
                "no usable presentation duration, assuming default segment count"
            );
            u64::from(defaults::DASH_SEGMENT_COUNT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn base() -> Url {
        Url::parse("http://host/dash/manifest.mpd").unwrap()
    }

    fn urls(manifest: &DashManifest) -> Vec<&str> {
        manifest.segments.iter().map(|s| s.url.as_str()).collect()
    }

    #[test]
    fn test_segment_template_count_from_period() {
        let xml = r#"<?xml version="1.0"?>
            <MPD xmlns="urn:mpeg:dash:schema:mpd:2011">
              <Period duration="PT20S">
                <AdaptationSet mimeType="video/mp4">
                  <Representation id="v1" codecs="avc1.64001F" bandwidth="800000">
                    <SegmentTemplate media="seg-$Number%03d$.m4s" initialization="$RepresentationID$-init.mp4"
                                     startNumber="1" duration="4" timescale="1"/>
                  </Representation>
                </AdaptationSet>
              </Period>
            </MPD>"#;
        let manifest = parse(xml, &base()).unwrap();

        assert_eq!(
            manifest.init_segment.as_ref().unwrap().as_str(),
            "http://host/dash/v1-init.mp4"
        );
        assert_eq!(
            urls(&manifest),
            vec![
                "http://host/dash/seg-001.m4s",
                "http://host/dash/seg-002.m4s",
                "http://host/dash/seg-003.m4s",
                "http://host/dash/seg-004.m4s",
                "http://host/dash/seg-005.m4s",
            ]
        );
        assert_eq!(manifest.segments[0].duration, Some(4.0));
        assert_eq!(manifest.mime_type, "video/mp4; codecs=\"avc1.64001F\"");
    }

    #[test]
    fn test_segment_list_preferred_over_template() {
        let xml = r#"<MPD><Period><AdaptationSet>
              <SegmentTemplate media="t-$Number$.m4s"/>
              <Representation id="a">
                <SegmentList duration="2">
                  <Initialization sourceURL="init.mp4"/>
                  <SegmentURL media="one.m4s"/>
                  <SegmentURL mediaURL="two.m4s"/>
                  <SegmentURL href="/abs/three.m4s"/>
                </SegmentList>
              </Representation>
            </AdaptationSet></Period></MPD>"#;
        let manifest = parse(xml, &base()).unwrap();

        assert_eq!(
            manifest.init_segment.as_ref().unwrap().as_str(),
            "http://host/dash/init.mp4"
        );
        assert_eq!(
            urls(&manifest),
            vec![
                "http://host/dash/one.m4s",
                "http://host/dash/two.m4s",
                "http://host/abs/three.m4s",
            ]
        );
        assert_eq!(manifest.segments[0].duration, Some(2.0));
        assert_eq!(manifest.mime_type, defaults::DASH_MIME_TYPE);
    }

    #[test]
    fn test_template_inherited_from_adaptation_set() {
        let xml = r#"<MPD mediaPresentationDuration="PT6S"><Period>
              <AdaptationSet>
                <BaseURL>media</BaseURL>
                <SegmentTemplate timescale="1000" duration="2000" media="$RepresentationID$_$Number$.m4s"/>
                <Representation id="low"><SegmentTemplate startNumber="5"/></Representation>
              </AdaptationSet>
            </Period></MPD>"#;
        let manifest = parse(xml, &base()).unwrap();

        assert_eq!(
            urls(&manifest),
            vec![
                "http://host/dash/media/low_5.m4s",
                "http://host/dash/media/low_6.m4s",
                "http://host/dash/media/low_7.m4s",
            ]
        );
        assert!(manifest.init_segment.is_none());
    }

    #[test]
    fn test_default_count_without_duration() {
        let xml = r#"<MPD><Period><AdaptationSet>
              <SegmentTemplate media="s$Number$.m4s" duration="4"/>
            </AdaptationSet></Period></MPD>"#;
        let manifest = parse(xml, &base()).unwrap();
        assert_eq!(manifest.segments.len(), 10);
        assert_eq!(manifest.segments[0].url.as_str(), "http://host/dash/s1.m4s");

        let zero = r#"<MPD><Period duration="PT20S"><AdaptationSet>
              <SegmentTemplate media="s$Number$.m4s" duration="0"/>
            </AdaptationSet></Period></MPD>"#;
        assert_eq!(parse(zero, &base()).unwrap().segments.len(), 10);
    }

    #[test]
    fn test_absolute_base_url() {
        let xml = r#"<MPD><BaseURL>https://cdn.example.com/v/</BaseURL><Period><AdaptationSet>
              <Representation id="r"><SegmentList><SegmentURL media="a.m4s"/></SegmentList></Representation>
            </AdaptationSet></Period></MPD>"#;
        let manifest = parse(xml, &base()).unwrap();
        assert_eq!(urls(&manifest), vec!["https://cdn.example.com/v/a.m4s"]);
    }

    #[test]
    fn test_invalid_documents() {
        assert_matches!(parse("<MPD><Period>", &base()), Err(Error::Xml(_)));
        assert_matches!(parse("<MPD><Period/></MPD>", &base()), Err(Error::InvalidManifest(_)));
    }
}
