use crate::parser::decode_base64;
use crate::types::{NodeCandidate, Outbound, Result, SubproxyError, TlsOptions, Transport, VmessOutbound};
use serde_json::{Map, Value};

/// Decode the base64 JSON document that follows `vmess://`.
pub fn parse(payload: &str) -> Result<NodeCandidate> {
    let decoded = decode_base64(payload).ok_or_else(|| SubproxyError::decode("vmess payload is not base64"))?;
    let json: Map<String, Value> = serde_json::from_str(&decoded)
        .map_err(|e| SubproxyError::decode(format!("vmess payload is not a JSON object: {}", e)))?;

    let server = text(&json, "add").ok_or_else(|| SubproxyError::decode("vmess missing server"))?;
    let server_port = number(&json, "port")
        .and_then(|port| u16::try_from(port).ok())
        .filter(|port| *port != 0)
        .ok_or_else(|| SubproxyError::decode("vmess missing or invalid port"))?;
    let uuid = text(&json, "id").ok_or_else(|| SubproxyError::decode("vmess missing uuid"))?;

    let name = text(&json, "ps").unwrap_or("vmess");
    let host = text(&json, "host").unwrap_or("");
    let path = text(&json, "path").unwrap_or("");

    let tls = (text(&json, "tls") == Some("tls"))
        .then(|| TlsOptions::enabled(text(&json, "sni").unwrap_or(server)));
    let transport = (text(&json, "net") == Some("ws")).then(|| Transport::websocket(path, host));

    Ok(NodeCandidate::subscription(
        name,
        Outbound::Vmess(VmessOutbound {
            server: server.to_string(),
            server_port,
            uuid: uuid.to_string(),
            alter_id: number(&json, "aid").unwrap_or(0),
            security: text(&json, "scy").unwrap_or("auto").to_string(),
            tls,
            transport,
        }),
    ))
}

fn text<'a>(json: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    json.get(key).and_then(Value::as_str).filter(|value| !value.is_empty())
}

// Clients emit numeric fields both as numbers and as strings.
fn number(json: &Map<String, Value>, key: &str) -> Option<u64> {
    match json.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
