/// Deterministic placeholder card output.
///
/// Rendered when no provider path is eligible or as the last step of the
/// fallback cascade, so a job can still complete with a usable artifact.
use chrono::Utc;
use serde_json::Value;

use crate::store::models::{Credential, Generation};

pub const CARD_MIME_TYPE: &str = "image/svg+xml";

fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn data_str<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Builds the SVG card bytes for a job and its credential.
#[must_use]
pub fn build_card(generation: &Generation, credential: &Credential) -> Vec<u8> {
    let name = xml_escape(data_str(&credential.data, "name").unwrap_or("Participante"));
    let city = data_str(&credential.data, "city").unwrap_or_default();
    let profession = data_str(&credential.data, "profession").unwrap_or_default();
    let subtitle = format!("{city} {profession}");
    let subtitle = subtitle.trim();
    let subtitle = if subtitle.is_empty() {
        "Quiz Experience".to_string()
    } else {
        xml_escape(subtitle)
    };
    let kind = xml_escape(generation.kind.as_str());
    let stamp = xml_escape(&Utc::now().format("%d/%m/%Y %H:%M:%S UTC").to_string());

    let svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="1080" height="1080">
<defs>
  <linearGradient id="bg" x1="0" y1="0" x2="1" y2="1">
    <stop offset="0%" stop-color="#0b1f3a"/>
    <stop offset="100%" stop-color="#1f4f8a"/>
  </linearGradient>
</defs>
<rect width="1080" height="1080" fill="url(#bg)"/>
<rect x="80" y="80" width="920" height="920" rx="36" fill="#ffffff" opacity="0.93"/>
<text x="130" y="220" font-size="52" font-family="Arial, sans-serif" fill="#0b1f3a">QUIZ CREDENTIAL</text>
<text x="130" y="320" font-size="68" font-weight="700" font-family="Arial, sans-serif" fill="#10294a">{name}</text>
<text x="130" y="390" font-size="36" font-family="Arial, sans-serif" fill="#274c77">{subtitle}</text>
<text x="130" y="480" font-size="28" font-family="Arial, sans-serif" fill="#274c77">Generation kind: {kind}</text>
<text x="130" y="900" font-size="22" font-family="Arial, sans-serif" fill="#4c627d">Generated at {stamp}</text>
</svg>"##
    );
    svg.into_bytes()
}
