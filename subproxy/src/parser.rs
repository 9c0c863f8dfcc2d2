use crate::protocols;
use crate::types::{NodeCandidate, NodeSource, Outbound};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, info, warn};

// Subscription providers are sloppy about padding and alphabet, so decode
// with the standard alphabet after folding the url-safe characters into it.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode one subscription payload into nodes.
///
/// Never fails as a whole: entries that do not decode are skipped.
pub fn parse_subscription_content(content: &str, source_url: &str) -> Vec<NodeCandidate> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(json) => parse_json_subscription(json, source_url),
            Err(e) => {
                warn!("Ignoring malformed JSON subscription from {}: {}", source_url, e);
                Vec::new()
            }
        };
    }

    let decoded = decode_if_base64(trimmed);
    let nodes: Vec<NodeCandidate> = decoded
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match protocols::parse_share_link(line) {
            Ok(node) => Some(node),
            Err(e) => {
                debug!("Skipping share link from {}: {}", source_url, e);
                None
            }
        })
        .collect();

    info!("Decoded {} share links from {}", nodes.len(), source_url);
    nodes
}

fn parse_json_subscription(json: Value, source_url: &str) -> Vec<NodeCandidate> {
    let (items, prefix) = match json {
        Value::Array(items) => (items, "json"),
        Value::Object(mut fields) => match fields.remove("outbounds") {
            Some(Value::Array(items)) => (items, "outbound"),
            _ => (Vec::new(), "outbound"),
        },
        _ => (Vec::new(), "json"),
    };

    let nodes: Vec<NodeCandidate> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(fields) => Some(fields),
            _ => None,
        })
        .enumerate()
        .map(|(index, fields)| {
            NodeCandidate::subscription(format!("{}-{}", prefix, index + 1), Outbound::Raw(fields))
        })
        .collect();

    info!("Decoded {} JSON outbounds from {}", nodes.len(), source_url);
    nodes
}

/// Turn statically configured outbound records into nodes.
///
/// Records without a non-empty string `type` are dropped. The name comes from
/// `tag`, then `name`, then `custom-<position>`.
pub fn custom_nodes(records: &[Value]) -> Vec<NodeCandidate> {
    records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let fields = record.as_object()?;
            match fields.get("type").and_then(Value::as_str) {
                Some(kind) if !kind.is_empty() => {}
                _ => {
                    debug!("Skipping custom node {} without a type", index + 1);
                    return None;
                }
            }

            let name = fields
                .get("tag")
                .and_then(Value::as_str)
                .or_else(|| fields.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| format!("custom-{}", index + 1));

            Some(NodeCandidate::new(name, Outbound::Raw(fields.clone()), NodeSource::Custom))
        })
        .collect()
}

pub fn is_probably_base64(value: &str) -> bool {
    if value.is_empty() || value.len() % 4 != 0 {
        return false;
    }
    value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=' | b'_' | b'-'))
}

/// Base64-decode to UTF-8 text, accepting both alphabets and missing padding.
pub fn decode_base64(value: &str) -> Option<String> {
    let normalized: String = value
        .trim()
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let bytes = LENIENT_BASE64.decode(normalized.trim_end_matches('=')).ok()?;
    String::from_utf8(bytes).ok()
}

fn decode_if_base64(value: &str) -> String {
    if !is_probably_base64(value) {
        return value.to_string();
    }
    decode_base64(value).unwrap_or_else(|| value.to_string())
}
