use std::fmt;

/// Canonical header names used by the stack.
pub mod names {
    pub const VIA: &str = "Via";
    pub const FROM: &str = "From";
    pub const TO: &str = "To";
    pub const CALL_ID: &str = "Call-ID";
    pub const CSEQ: &str = "CSeq";
    pub const CONTACT: &str = "Contact";
    pub const EXPIRES: &str = "Expires";
    pub const ROUTE: &str = "Route";
    pub const MAX_FORWARDS: &str = "Max-Forwards";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const ALLOW: &str = "Allow";
    pub const USER_AGENT: &str = "User-Agent";
    pub const SERVER: &str = "Server";
}

/// Maps RFC 3261 compact forms to their long names.
fn expand_compact(name: &str) -> &str {
    match name {
        "v" | "V" => names::VIA,
        "f" | "F" => names::FROM,
        "t" | "T" => names::TO,
        "i" | "I" => names::CALL_ID,
        "m" | "M" => names::CONTACT,
        "l" | "L" => names::CONTENT_LENGTH,
        "c" | "C" => names::CONTENT_TYPE,
        other => other,
    }
}

/// Case-insensitive header name comparison that understands compact forms.
pub fn header_name_eq(a: &str, b: &str) -> bool {
    expand_compact(a).eq_ignore_ascii_case(expand_compact(b))
}

/// A raw header line. Values are kept as received; typed access is done on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// True when this header has the given name (compact forms included).
    pub fn is(&self, name: &str) -> bool {
        header_name_eq(&self.name, name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", expand_compact(&self.name), self.value)
    }
}

/// Splits a comma-separated header value, honouring quoted strings and `<...>`.
pub(crate) fn split_comma_values(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth_angle = 0usize;
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => depth_angle += 1,
            '>' if !in_quotes => depth_angle = depth_angle.saturating_sub(1),
            ',' if !in_quotes && depth_angle == 0 => {
                out.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(value[start..].trim());
    out.retain(|v| !v.is_empty());
    out
}
