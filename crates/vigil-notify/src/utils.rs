//! Utility functions for notification channels

use base64::Engine;
use serde_json::Value;

/// Maximum length for error text kept in run records
pub const MAX_BODY_LENGTH: usize = 4000;

/// Truncate a string to the specified maximum length (in bytes, on a char
/// boundary)
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

/// Plain-text alternative for an HTML body: tags dropped, whitespace
/// collapsed, common entities decoded.
pub fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut in_style = false;
    let mut tag = String::new();
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag.trim_start_matches('/').to_lowercase();
                let name = name.split_whitespace().next().unwrap_or_default();
                if name == "style" {
                    in_style = !tag.starts_with('/');
                }
                if matches!(name, "br" | "p" | "div" | "li" | "tr" | "h1" | "h2" | "h3") {
                    text.push('\n');
                }
            }
            _ if in_tag => tag.push(c),
            _ if in_style => {}
            _ => text.push(c),
        }
    }
    let text = text
        .replace("&nbsp;", " ")
        .replace("&middot;", "·")
        .replace("&copy;", "©")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decodes `data:<mime>;base64,<payload>` into `(mime, bytes)`.
pub fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.trim().strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()?;
    let mime = if mime.is_empty() {
        "application/octet-stream"
    } else {
        mime
    };
    Some((mime.to_string(), bytes))
}
