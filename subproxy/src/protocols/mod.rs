//! Share-link decoders, one module per URI scheme.

pub mod shadowsocks;
pub mod trojan;
pub mod vless;
pub mod vmess;

use crate::types::{NodeCandidate, Result, SubproxyError};
use percent_encoding::percent_decode_str;
use url::Url;

/// Decode a single share link by scheme.
pub fn parse_share_link(link: &str) -> Result<NodeCandidate> {
    if let Some(rest) = link.strip_prefix("ss://") {
        return shadowsocks::parse(rest);
    }
    if link.starts_with("trojan://") {
        return trojan::parse(link);
    }
    if link.starts_with("vless://") {
        return vless::parse(link);
    }
    if let Some(rest) = link.strip_prefix("vmess://") {
        return vmess::parse(rest);
    }

    let scheme = link.split("://").next().unwrap_or(link);
    Err(SubproxyError::decode(format!("unsupported scheme: {}", scheme)))
}

pub(crate) fn percent_decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// Host and port of a URI-style link; the port defaults to 443.
pub(crate) fn endpoint(url: &Url) -> Result<(String, u16)> {
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| SubproxyError::decode("missing host"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    Ok((host, url.port().unwrap_or(443)))
}

/// Display name from the fragment, or `default` when absent or empty.
pub(crate) fn fragment_name(url: &Url, default: &str) -> String {
    url.fragment()
        .map(percent_decode)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// First non-empty value of the query parameter `key`.
pub(crate) fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

pub(crate) fn parse_url(link: &str) -> Result<Url> {
    Url::parse(link).map_err(|e| SubproxyError::decode(format!("invalid link: {}", e)))
}
