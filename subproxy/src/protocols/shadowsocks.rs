use super::percent_decode;
use crate::parser::{decode_base64, is_probably_base64};
use crate::types::{NodeCandidate, Outbound, Result, ShadowsocksOutbound, SubproxyError};

/// Decode the part of an `ss://` link after the scheme.
///
/// Accepts both the SIP002 form (`userinfo@host:port`, userinfo optionally
/// base64) and the legacy form where everything before `#` is base64.
pub fn parse(link: &str) -> Result<NodeCandidate> {
    let (main, name) = link.split_once('#').unwrap_or((link, ""));
    let base = main.split('?').next().unwrap_or(main);

    let (user_info, host_port) = match base.find('@') {
        Some(at) => {
            let user_info = &base[..at];
            let decoded = if is_probably_base64(user_info) {
                decode_base64(user_info)
            } else {
                None
            };
            (decoded.unwrap_or_else(|| user_info.to_string()), base[at + 1..].to_string())
        }
        None => {
            let decoded = decode_base64(base)
                .ok_or_else(|| SubproxyError::decode("ss payload is not base64"))?;
            let (user_info, host_port) = decoded
                .split_once('@')
                .ok_or_else(|| SubproxyError::decode("ss payload has no '@'"))?;
            (user_info.to_string(), host_port.to_string())
        }
    };

    let (method, password) = user_info.split_once(':').unwrap_or((user_info.as_str(), ""));
    if method.is_empty() || password.is_empty() {
        return Err(SubproxyError::decode("ss link missing method or password"));
    }

    let host_port = host_port.trim_end_matches('/');
    let (server, port) = host_port
        .rsplit_once(':')
        .ok_or_else(|| SubproxyError::decode("ss link missing port"))?;
    let server = server.trim_start_matches('[').trim_end_matches(']');
    if server.is_empty() {
        return Err(SubproxyError::decode("ss link missing host"));
    }
    let server_port: u16 = port
        .parse()
        .map_err(|_| SubproxyError::decode(format!("invalid ss port: {}", port)))?;

    let name = if name.is_empty() {
        "shadowsocks".to_string()
    } else {
        percent_decode(name)
    };

    Ok(NodeCandidate::subscription(
        name,
        Outbound::Shadowsocks(ShadowsocksOutbound {
            server: server.to_string(),
            server_port,
            method: method.to_string(),
            password: password.to_string(),
        }),
    ))
}
