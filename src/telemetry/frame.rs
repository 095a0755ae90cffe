//! Classification of device lines.
//!
//! Two payload shapes carry values:
//! - structured samples, an object-like record such as `{"s":12,"t":21.5,"m":1834}`
//! - command replies starting with `OK`, such as `OK s:12 t:21.5 m:1834 r:5`
//!
//! Fields are located by tag rather than by a strict grammar, so extra
//! fields and whitespace do not matter. Tags inside quoted values are ignored.

/// Marker that starts a command reply
pub const REPLY_MARKER: &str = "OK";

/// Sequence number tag
pub const FIELD_SEQUENCE: &str = "s";
/// Temperature tag (°C)
pub const FIELD_TEMPERATURE: &str = "t";
/// Raw moisture tag
pub const FIELD_MOISTURE: &str = "m";
/// Sampling interval tag (seconds)
pub const FIELD_RATE: &str = "r";

/// A complete structured sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub sequence: u64,
    pub temperature_c: f64,
    pub moisture_raw: i64,
}

/// Optional fields of a command reply
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReplyFields {
    pub sequence: Option<u64>,
    pub temperature_c: Option<f64>,
    pub moisture_raw: Option<i64>,
    pub rate_s: Option<u32>,
}

impl ReplyFields {
    /// The reply carries a full sample
    pub fn sample(&self) -> Option<Sample> {
        Some(Sample {
            sequence: self.sequence?,
            temperature_c: self.temperature_c?,
            moisture_raw: self.moisture_raw?,
        })
    }
}

/// Parse a structured sample; all three fields are required
pub fn parse_sample(payload: &str) -> Option<Sample> {
    if !(payload.contains('{') && payload.contains('}')) {
        return None;
    }

    Some(Sample {
        sequence: find_field(payload, FIELD_SEQUENCE)?.parse().ok()?,
        temperature_c: parse_float(find_field(payload, FIELD_TEMPERATURE)?)?,
        moisture_raw: find_field(payload, FIELD_MOISTURE)?.parse().ok()?,
    })
}

/// Parse a command reply, `None` if the payload is not a reply
pub fn parse_reply(payload: &str) -> Option<ReplyFields> {
    let rest = payload.trim_start().strip_prefix(REPLY_MARKER)?;
    if rest.chars().next().map_or(false, is_word_char) {
        return None;
    }

    Some(ReplyFields {
        sequence: find_field(payload, FIELD_SEQUENCE).and_then(|v| v.parse().ok()),
        temperature_c: find_field(payload, FIELD_TEMPERATURE).and_then(parse_float),
        moisture_raw: find_field(payload, FIELD_MOISTURE).and_then(|v| v.parse().ok()),
        rate_s: find_field(payload, FIELD_RATE).and_then(|v| v.parse().ok()),
    })
}

fn parse_float(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')
}

/// Whether the end of `prefix` sits inside a double-quoted string
fn inside_quotes(prefix: &str) -> bool {
    let mut inside = false;
    let mut escaped = false;
    for c in prefix.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' if inside => escaped = true,
            '"' => inside = !inside,
            _ => {}
        }
    }
    inside
}

/// Find the numeric value tagged `key` (`key:value`, `"key": value`)
///
/// Inside a quoted string only the whole string may be the tag, so
/// `"note":"t:5"` never yields a value for `t`.
pub fn find_field<'a>(payload: &'a str, key: &str) -> Option<&'a str> {
    for (index, _) in payload.match_indices(key) {
        let before = payload[..index].chars().next_back();
        if before.map_or(false, is_word_char) {
            continue;
        }

        let rest = &payload[index + key.len()..];
        if rest.chars().next().map_or(false, is_word_char) {
            continue;
        }

        let rest = if inside_quotes(&payload[..index]) {
            // A quoted tag is the entire string
            match rest.strip_prefix('"') {
                Some(rest) if before == Some('"') => rest,
                _ => continue,
            }
        } else {
            rest
        };

        let rest = rest.trim_start();
        let Some(rest) = rest.strip_prefix(':') else {
            continue;
        };

        let rest = rest.trim_start();
        let rest = rest.strip_prefix('"').unwrap_or(rest);
        let end = rest
            .char_indices()
            .find(|&(_, c)| !is_number_char(c))
            .map_or(rest.len(), |(i, _)| i);

        if end > 0 {
            return Some(&rest[..end]);
        }
    }

    None
}
