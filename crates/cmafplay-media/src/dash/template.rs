//! SegmentTemplate identifier expansion and ISO 8601 durations.

/// Values substituted into `$Identifier$` template fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateVars<'a> {
    pub representation_id: &'a str,
    pub bandwidth: Option<u64>,
    pub number: Option<u64>,
}

/// Expand `$RepresentationID$`, `$Number$`, `$Bandwidth$` (the numeric ones
/// optionally with a `%0Nd` width) and `$$`.
///
/// Identifiers without a value are left untouched, as is an unterminated `$`.
pub fn expand_template(template: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;

    while let Some(open) = rest.find('$') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('$') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let field = &after[..close];
        match substitute(field, vars) {
            Some(value) => out.push_str(&value),
            None => {
                out.push('$');
                out.push_str(field);
                out.push('$');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn substitute(field: &str, vars: &TemplateVars<'_>) -> Option<String> {
    if field.is_empty() {
        return Some("$".to_string());
    }
    let (name, format) = match field.split_once('%') {
        Some((name, format)) => (name, Some(format)),
        None => (field, None),
    };
    let value = match name {
        "RepresentationID" if format.is_none() => return Some(vars.representation_id.to_string()),
        "Number" => vars.number?,
        "Bandwidth" => vars.bandwidth?,
        _ => return None,
    };
    match format {
        None => Some(value.to_string()),
        Some(format) => {
            let digits = format.strip_suffix('d')?;
            let width: usize = if digits.is_empty() { 0 } else { digits.parse().ok()? };
            Some(format!("{:0width$}", value, width = width))
        }
    }
}

/// Parse an ISO 8601 duration such as `PT1H2M3.5S` or `P1DT2H` into seconds.
///
/// Year and month components have no fixed length and are rejected.
pub fn parse_iso8601_duration(text: &str) -> Option<f64> {
    let body = text.trim().strip_prefix('P')?;
    let (date, time) = match body.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };

    let mut seconds = 0.0;
    let mut seen = false;
    for (value, unit) in components(date)? {
        seconds += match unit {
            'W' => value * 7.0 * 86_400.0,
            'D' => value * 86_400.0,
            _ => return None,
        };
        seen = true;
    }
    if let Some(time) = time {
        for (value, unit) in components(time)? {
            seconds += match unit {
                'H' => value * 3_600.0,
                'M' => value * 60.0,
                'S' => value,
                _ => return None,
            };
            seen = true;
        }
    }

    seen.then_some(seconds)
}

/// Split `1H2M3.5S` into `(1, 'H'), (2, 'M'), (3.5, 'S')`.
fn components(text: &str) -> Option<Vec<(f64, char)>> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c.is_ascii_alphabetic() {
            let value: f64 = text[start..i].parse().ok()?;
            out.push((value, c));
            start = i + 1;
        }
    }
    if start != text.len() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(number: u64) -> TemplateVars<'static> {
        TemplateVars {
            representation_id: "v1",
            bandwidth: Some(800_000),
            number: Some(number),
        }
    }

    #[test]
    fn test_expand_number() {
        assert_eq!(expand_template("seg-$Number%03d$.m4s", &vars(7)), "seg-007.m4s");
        assert_eq!(expand_template("seg-$Number$.m4s", &vars(12)), "seg-12.m4s");
        assert_eq!(expand_template("seg-$Number%02d$.m4s", &vars(123)), "seg-123.m4s");
    }

    #[test]
    fn test_expand_identifiers() {
        assert_eq!(
            expand_template("$RepresentationID$/$Bandwidth$/init.mp4", &vars(1)),
            "v1/800000/init.mp4"
        );
        assert_eq!(expand_template("cost$$5-$Number$", &vars(1)), "cost$5-1");
    }

    #[test]
    fn test_expand_leaves_unknown_fields() {
        assert_eq!(expand_template("t-$Time$.m4s", &vars(1)), "t-$Time$.m4s");
        assert_eq!(expand_template("broken$Number", &vars(1)), "broken$Number");
        let no_number = TemplateVars {
            representation_id: "a",
            ..Default::default()
        };
        assert_eq!(expand_template("$Number$", &no_number), "$Number$");
    }

    #[test]
    fn test_parse_iso8601_duration() {
        assert_eq!(parse_iso8601_duration("PT20S"), Some(20.0));
        assert_eq!(parse_iso8601_duration("PT1H2M3.5S"), Some(3723.5));
        assert_eq!(parse_iso8601_duration("PT0H10M"), Some(600.0));
        assert_eq!(parse_iso8601_duration("P1DT1S"), Some(86_401.0));
        assert_eq!(parse_iso8601_duration("P1Y"), None);
        assert_eq!(parse_iso8601_duration("PT"), None);
        assert_eq!(parse_iso8601_duration("20S"), None);
        assert_eq!(parse_iso8601_duration("PTxS"), None);
    }
}
