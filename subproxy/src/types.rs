use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Where a node came from. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeSource {
    Subscription,
    Custom,
}

impl fmt::Display for NodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSource::Subscription => f.write_str("subscription"),
            NodeSource::Custom => f.write_str("custom"),
        }
    }
}

/// One proxy endpoint, as decoded from a subscription or taken from the
/// static node list.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCandidate {
    pub tag: String,
    pub name: String,
    pub original_name: Option<String>,
    pub outbound: Outbound,
    pub source: NodeSource,
}

impl NodeCandidate {
    pub fn new(name: impl Into<String>, outbound: Outbound, source: NodeSource) -> Self {
        let name = name.into();
        Self {
            tag: name.clone(),
            original_name: Some(name.clone()),
            name,
            outbound,
            source,
        }
    }

    pub fn subscription(name: impl Into<String>, outbound: Outbound) -> Self {
        Self::new(name, outbound, NodeSource::Subscription)
    }

    /// Name used for keyword matching: the display name, or the decoded
    /// name when the display name is empty.
    pub fn match_name(&self) -> &str {
        if !self.name.is_empty() {
            return &self.name;
        }
        self.original_name.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TlsOptions {
    pub enabled: bool,
    pub server_name: String,
}

impl TlsOptions {
    pub fn enabled(server_name: impl Into<String>) -> Self {
        Self {
            enabled: true,
            server_name: server_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transport {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl Transport {
    /// Websocket transport; an empty path becomes `/`, an empty host adds no header.
    pub fn websocket(path: &str, host: &str) -> Self {
        let headers = if host.is_empty() {
            None
        } else {
            Some(BTreeMap::from([("Host".to_string(), host.to_string())]))
        };
        Self {
            kind: "ws".to_string(),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            headers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShadowsocksOutbound {
    pub server: String,
    pub server_port: u16,
    pub method: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrojanOutbound {
    pub server: String,
    pub server_port: u16,
    pub password: String,
    pub tls: TlsOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VlessOutbound {
    pub server: String,
    pub server_port: u16,
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmessOutbound {
    pub server: String,
    pub server_port: u16,
    pub uuid: String,
    pub alter_id: u64,
    pub security: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
}

/// Protocol payload of a node.
///
/// The typed variants are produced by the share-link decoders. `Raw` carries
/// outbounds from JSON subscriptions and the static node list unvalidated, so
/// kinds this crate does not know about still reach sing-box untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Shadowsocks(ShadowsocksOutbound),
    Trojan(TrojanOutbound),
    Vless(VlessOutbound),
    Vmess(VmessOutbound),
    Raw(Map<String, Value>),
}

impl Outbound {
    pub fn protocol(&self) -> &str {
        match self {
            Outbound::Shadowsocks(_) => "shadowsocks",
            Outbound::Trojan(_) => "trojan",
            Outbound::Vless(_) => "vless",
            Outbound::Vmess(_) => "vmess",
            Outbound::Raw(fields) => fields.get("type").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }

    /// Flatten into the JSON object sing-box expects, `type` first.
    pub fn to_fields(&self) -> Result<Map<String, Value>> {
        let body = match self {
            Outbound::Shadowsocks(outbound) => serde_json::to_value(outbound)?,
            Outbound::Trojan(outbound) => serde_json::to_value(outbound)?,
            Outbound::Vless(outbound) => serde_json::to_value(outbound)?,
            Outbound::Vmess(outbound) => serde_json::to_value(outbound)?,
            Outbound::Raw(fields) => return Ok(fields.clone()),
        };

        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(self.protocol().to_string()));
        if let Value::Object(body) = body {
            fields.extend(body);
        }
        Ok(fields)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Subscription request to {url} failed: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Subscription request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Subscription request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SubproxyError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    Validation(String),

    #[error("Failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SubproxyError {
    pub fn decode(message: impl Into<String>) -> Self {
        SubproxyError::Decode(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SubproxyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_outbound_puts_type_first() {
        let outbound = Outbound::Shadowsocks(ShadowsocksOutbound {
            server: "ss.example.com".to_string(),
            server_port: 8388,
            method: "aes-128-gcm".to_string(),
            password: "pw".to_string(),
        });

        let fields = outbound.to_fields().unwrap();
        let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["type", "server", "server_port", "method", "password"]);
        assert_eq!(fields["type"], json!("shadowsocks"));
    }

    #[test]
    fn raw_outbound_passes_through() {
        let raw = json!({"type": "hysteria2", "server": "h.example.com", "extra": [1, 2]});
        let Value::Object(map) = raw.clone() else { unreachable!() };
        let outbound = Outbound::Raw(map);

        assert_eq!(outbound.protocol(), "hysteria2");
        assert_eq!(Value::Object(outbound.to_fields().unwrap()), raw);
    }

    #[test]
    fn websocket_transport_defaults() {
        let transport = Transport::websocket("", "");
        assert_eq!(transport.path, "/");
        assert!(transport.headers.is_none());

        let value = serde_json::to_value(Transport::websocket("/ws", "cdn.example.com")).unwrap();
        assert_eq!(value, json!({"type": "ws", "path": "/ws", "headers": {"Host": "cdn.example.com"}}));
    }

    #[test]
    fn match_name_falls_back_to_original() {
        let mut node = NodeCandidate::subscription("Tokyo", Outbound::Raw(Map::new()));
        node.name.clear();
        assert_eq!(node.match_name(), "Tokyo");
    }
}
