//! sing-box configuration document.
//!
//! Field names and nesting mirror sing-box's own config format. Struct field
//! order fixes the serialized key order, so the same nodes and policy always
//! produce byte-identical output.

use crate::config::NormalizedConfig;
use crate::types::{NodeCandidate, Result, SubproxyError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

pub const PROXY_TAG: &str = "proxy";
pub const DIRECT_TAG: &str = "direct";
pub const BLOCK_TAG: &str = "block";
pub const CN_IP_RULE_SET: &str = "cn-ip";
pub const CN_DOMAIN_RULE_SET: &str = "cn-domain";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingBoxConfig {
    pub log: LogSection,
    pub experimental: Experimental,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Map<String, Value>>,
    pub route: Route,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSection {
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Experimental {
    pub cache_file: CacheFile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheFile {
    pub enabled: bool,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inbound {
    #[serde(rename = "type")]
    pub kind: String,
    pub tag: String,
    pub listen: String,
    pub listen_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlTestOutbound {
    #[serde(rename = "type")]
    pub kind: String,
    pub tag: String,
    pub outbounds: Vec<String>,
    pub url: String,
    pub interval: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub rule_set: Vec<RuleSet>,
    pub rules: Vec<RouteRule>,
    #[serde(rename = "final")]
    pub final_outbound: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSet {
    #[serde(rename = "type")]
    pub kind: String,
    pub tag: String,
    pub format: String,
    pub url: String,
    pub download_detour: String,
    pub update_interval: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_is_private: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domain_suffix: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rule_set: Vec<String>,
    pub outbound: String,
}

/// Project processed nodes and policy into a sing-box config.
///
/// Fails when `nodes` is empty: a config without usable outbounds is never emitted.
pub fn build_singbox_config(nodes: &[NodeCandidate], config: &NormalizedConfig) -> Result<SingBoxConfig> {
    if nodes.is_empty() {
        return Err(SubproxyError::Validation("No nodes available after filtering.".to_string()));
    }

    let mut outbounds = nodes.iter().map(node_outbound).collect::<Result<Vec<_>>>()?;
    outbounds.push(as_fields(&UrlTestOutbound {
        kind: "urltest".to_string(),
        tag: PROXY_TAG.to_string(),
        outbounds: nodes.iter().map(|node| node.tag.clone()).collect(),
        url: config.test.url.clone(),
        interval: config.interval.test.clone(),
    })?);
    outbounds.push(plain_outbound(DIRECT_TAG));
    outbounds.push(plain_outbound(BLOCK_TAG));

    Ok(SingBoxConfig {
        log: LogSection {
            level: config.sing_box.log_level.as_str().to_string(),
        },
        experimental: Experimental {
            cache_file: CacheFile {
                enabled: true,
                path: config.sing_box.work_dir.join("cache.db"),
            },
        },
        inbounds: vec![
            inbound("socks", "socks-in", config, config.inbound.socks_port),
            inbound("http", "http-in", config, config.inbound.http_port),
        ],
        outbounds,
        route: route(config),
    })
}

fn node_outbound(node: &NodeCandidate) -> Result<Map<String, Value>> {
    let mut fields = node.outbound.to_fields()?;
    fields.insert("tag".to_string(), Value::String(node.tag.clone()));
    Ok(fields)
}

fn plain_outbound(kind: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("type".to_string(), Value::String(kind.to_string()));
    fields.insert("tag".to_string(), Value::String(kind.to_string()));
    fields
}

fn as_fields<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(SubproxyError::Validation(format!("expected a JSON object, got {}", other))),
    }
}

fn inbound(kind: &str, tag: &str, config: &NormalizedConfig, port: u16) -> Inbound {
    Inbound {
        kind: kind.to_string(),
        tag: tag.to_string(),
        listen: config.inbound.listen.clone(),
        listen_port: port,
    }
}

fn remote_rule_set(tag: &str, url: &str, config: &NormalizedConfig) -> RuleSet {
    RuleSet {
        kind: "remote".to_string(),
        tag: tag.to_string(),
        format: "binary".to_string(),
        url: url.to_string(),
        download_detour: PROXY_TAG.to_string(),
        update_interval: config.rule_set.update_interval.clone(),
    }
}

fn route(config: &NormalizedConfig) -> Route {
    Route {
        rule_set: vec![
            remote_rule_set(CN_IP_RULE_SET, &config.rule_set.geoip_cn_url, config),
            remote_rule_set(CN_DOMAIN_RULE_SET, &config.rule_set.geosite_cn_url, config),
        ],
        rules: vec![
            RouteRule {
                ip_is_private: Some(true),
                domain_suffix: vec![".local".to_string()],
                rule_set: Vec::new(),
                outbound: DIRECT_TAG.to_string(),
            },
            RouteRule {
                ip_is_private: None,
                domain_suffix: Vec::new(),
                rule_set: vec![CN_IP_RULE_SET.to_string(), CN_DOMAIN_RULE_SET.to_string()],
                outbound: DIRECT_TAG.to_string(),
            },
        ],
        final_outbound: PROXY_TAG.to_string(),
    }
}
