//! Namespace-agnostic XML extraction for ONVIF SOAP responses.
//!
//! ONVIF devices disagree on namespace prefixes (`tds:`, `tt:`, `trt:`,
//! `wsdd:`, `d:`, or none at all), so these helpers match on the local
//! element name only. They are not a general XML parser.

/// Text content of the first `<prefix:tag>` or `<tag>` element.
pub fn element_text(xml: &str, tag: &str) -> Option<String> {
    element_texts(xml, tag).into_iter().next()
}

/// Text content of every `<prefix:tag>`/`<tag>` element, in document order.
///
/// Empty elements are skipped. Entities are unescaped.
pub fn element_texts(xml: &str, tag: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some((open_end, name_end)) = find_open_tag(rest, tag) {
        let after_open = &rest[open_end..];
        let close = format!("{}>", &rest[name_end.0..name_end.1]);
        let Some(close_at) = find_close_tag(after_open, &close) else {
            break;
        };
        let value = unescape(after_open[..close_at].trim());
        if !value.is_empty() {
            out.push(value);
        }
        rest = &after_open[close_at..];
    }
    out
}

/// Value of `attr` on every `<prefix:tag ...>` start tag, in document order.
pub fn attribute_values(xml: &str, tag: &str, attr: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = find_tag_start(rest, tag) {
        let tail = &rest[start..];
        let Some(end) = tail.find('>') else {
            break;
        };
        if let Some(value) = attribute_in(&tail[..end], attr) {
            out.push(unescape(&value));
        }
        rest = &tail[end..];
    }
    out
}

/// The slice between the first `<prefix:tag ...>` and its matching close tag.
pub fn section<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let (open_end, name) = find_open_tag(xml, tag)?;
    let after_open = &xml[open_end..];
    let close = format!("{}>", &xml[name.0..name.1]);
    let close_at = find_close_tag(after_open, &close)?;
    Some(&after_open[..close_at])
}

/// True if the document carries a SOAP fault.
pub fn is_fault(xml: &str) -> bool {
    find_tag_start(xml, "Fault").is_some()
}

/// Human-readable reason of a SOAP fault, if present.
pub fn fault_reason(xml: &str) -> Option<String> {
    let fault = section(xml, "Fault")?;
    element_text(fault, "Text")
        .or_else(|| element_text(fault, "Value"))
        .or_else(|| element_text(fault, "faultstring"))
}

pub fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Byte offset of a start tag (`<tag` or `<ns:tag`) whose local name is exactly `tag`.
fn find_tag_start(xml: &str, tag: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(pos) = xml[offset..].find('<') {
        let start = offset + pos;
        let name = tag_name(&xml[start + 1..]);
        if !name.starts_with('/') && local_name(name) == tag {
            return Some(start);
        }
        offset = start + 1;
    }
    None
}

/// Returns (offset just past `>`, qualified-name span) for the first
/// non-self-closing start tag with local name `tag`.
fn find_open_tag(xml: &str, tag: &str) -> Option<(usize, (usize, usize))> {
    let mut offset = 0;
    loop {
        let start = offset + find_tag_start(&xml[offset..], tag)?;
        let name_len = tag_name(&xml[start + 1..]).len();
        let end = start + xml[start..].find('>')?;
        if xml[..end].ends_with('/') {
            offset = end + 1;
            continue;
        }
        return Some((end + 1, (start + 1, start + 1 + name_len)));
    }
}

fn find_close_tag(xml: &str, qualified_close: &str) -> Option<usize> {
    let pattern = format!("</{}", qualified_close);
    xml.find(&pattern)
}

fn tag_name(after_lt: &str) -> &str {
    let end = after_lt
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/' && !after_lt.starts_with('/'))
        .unwrap_or(after_lt.len());
    &after_lt[..end]
}

fn local_name(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

fn attribute_in(start_tag: &str, attr: &str) -> Option<String> {
    let mut rest = start_tag;
    while let Some(pos) = rest.find(attr) {
        let before = rest[..pos].chars().last();
        let after = &rest[pos + attr.len()..];
        let boundary = matches!(before, Some(c) if c.is_whitespace() || c == ':');
        let after_trim = after.trim_start();
        if boundary && after_trim.starts_with('=') {
            let value = after_trim[1..].trim_start();
            let quote = value.chars().next()?;
            if quote == '"' || quote == '\'' {
                let inner = &value[1..];
                let end = inner.find(quote)?;
                return Some(inner[..end].to_string());
            }
        }
        rest = after;
    }
    None
}
