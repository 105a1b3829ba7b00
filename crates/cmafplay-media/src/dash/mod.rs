//! DASH MPD manifests.

mod mpd;
mod render;
mod template;

pub use mpd::{parse, DashManifest};
pub use render::{render_template_mpd, TemplateMpd};
pub use template::{expand_template, parse_iso8601_duration, TemplateVars};
