use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Once;
use subproxy::config::{normalize_config, parse_config};
use subproxy::storage::hash_path;
use subproxy::{
    build_singbox_config, parse_subscription_content, write_json_if_changed, NodePipeline, NormalizedConfig, Runner,
    SubproxyError,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();
    });
}

fn subscription_payload() -> String {
    let vmess = STANDARD.encode(
        json!({
            "v": "2",
            "ps": "JP vmess",
            "add": "vmess.example.com",
            "port": "443",
            "id": "00000000-0000-0000-0000-000000000000",
            "aid": "0",
            "net": "ws",
            "host": "cdn.example.com",
            "path": "/ws",
            "tls": "tls"
        })
        .to_string(),
    );
    let lines = [
        "ss://aes-256-gcm:pw@ss.example.com:8388#HK%20Expire%202030".to_string(),
        "trojan://secret@trojan.example.com:443?sni=example.com#US%20trojan".to_string(),
        "vless://00000000-0000-0000-0000-000000000001@vless.example.com:443?security=tls&type=ws&path=%2Fws#SG%20vless"
            .to_string(),
        format!("vmess://{}", vmess),
        "hysteria2://pw@h.example.com:443#unsupported".to_string(),
    ];
    STANDARD.encode(lines.join("\n"))
}

fn config_in(dir: &Path, yaml: &str) -> NormalizedConfig {
    normalize_config(parse_config(yaml).unwrap(), dir)
}

#[test]
fn test_decode_process_synthesize() {
    init_tracing();
    let nodes = parse_subscription_content(&subscription_payload(), "https://example.com/sub");
    assert_eq!(nodes.len(), 4);

    let keywords = vec!["expire".to_string()];
    let nodes = NodePipeline::standard(&keywords).run(nodes);
    let tags: Vec<&str> = nodes.iter().map(|n| n.tag.as_str()).collect();
    assert_eq!(tags, vec!["node-001", "node-002", "node-003"]);

    let config = config_in(Path::new("/srv/proxy"), "");
    let document = build_singbox_config(&nodes, &config).unwrap();
    let doc = serde_json::to_value(&document).unwrap();

    let outbounds = doc["outbounds"].as_array().unwrap();
    assert_eq!(outbounds.len(), 6);
    let kinds: Vec<&str> = outbounds.iter().map(|o| o["type"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["trojan", "vless", "vmess", "urltest", "direct", "block"]);
    assert_eq!(outbounds[0]["tag"], json!("node-001"));
    assert_eq!(outbounds[0]["tls"]["server_name"], json!("example.com"));
    assert_eq!(outbounds[2]["server_port"], json!(443));
    assert_eq!(outbounds[3]["outbounds"], json!(["node-001", "node-002", "node-003"]));
    assert_eq!(doc["route"]["final"], json!("proxy"));
}

#[test]
fn test_everything_filtered_is_a_validation_error() {
    let nodes = parse_subscription_content("trojan://pw@t.example.com:443#Expire%20soon", "inline");
    let keywords = vec!["EXPIRE".to_string()];
    let nodes = NodePipeline::standard(&keywords).run(nodes);
    assert!(nodes.is_empty());

    let config = config_in(Path::new("/srv/proxy"), "");
    let err = build_singbox_config(&nodes, &config).unwrap_err();
    assert!(matches!(err, SubproxyError::Validation(_)));
}

#[tokio::test]
async fn test_persist_only_on_change() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), "");
    let target = &config.sing_box.config_path;

    let nodes = NodePipeline::standard(&[]).run(parse_subscription_content(&subscription_payload(), "inline"));
    let document = build_singbox_config(&nodes, &config).unwrap();

    assert!(write_json_if_changed(target, &document).await.unwrap());
    assert!(!write_json_if_changed(target, &document).await.unwrap());

    let fewer = build_singbox_config(&nodes[..2], &config).unwrap();
    assert!(write_json_if_changed(target, &fewer).await.unwrap());

    let written: Value = serde_json::from_str(&std::fs::read_to_string(target).unwrap()).unwrap();
    assert_eq!(written["outbounds"].as_array().unwrap().len(), 5);
    assert!(hash_path(target).exists());
}

#[tokio::test]
async fn test_runner_generates_from_subscription_and_static_nodes() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sub"))
        .respond_with(ResponseTemplate::new(200).set_body_string(subscription_payload()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        r#"
subscriptions:
  - "{}/sub"
  - "   "
nodes:
  - type: socks
    tag: office
    server: 10.0.0.1
    server_port: 1080
excludeKeywords: ["vless"]
inbound:
  socksPort: 2080
singBox:
  logLevel: warn
"#,
        server.uri()
    );
    let config = config_in(dir.path(), &yaml);
    assert_eq!(config.subscriptions.len(), 1);

    let runner = Runner::new(config).unwrap();
    let listed = runner.list_nodes().await.unwrap();
    let tags: Vec<&str> = listed.iter().map(|n| n.tag.as_str()).collect();
    assert_eq!(tags, vec!["node-001", "node-002", "node-003", "node-004"]);
    assert_eq!(listed[3].outbound.protocol(), "socks");

    let written = runner.generate_once().await.unwrap();
    assert_eq!(written, dir.path().join(".subproxy-cli").join("sing-box.json"));

    let doc: Value = serde_json::from_str(&std::fs::read_to_string(&written).unwrap()).unwrap();
    assert_eq!(doc["log"]["level"], json!("warn"));
    assert_eq!(doc["inbounds"][0]["listen_port"], json!(2080));
    assert_eq!(doc["outbounds"][3]["server"], json!("10.0.0.1"));
    assert_eq!(doc["outbounds"].as_array().unwrap().len(), 7);

    // Same subscription content, same document.
    assert!(!runner.update().await.unwrap());
}

#[tokio::test]
async fn test_runner_fails_when_a_subscription_is_unreachable() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let yaml = format!("subscriptions: [\"{}/broken\"]\n", server.uri());
    let runner = Runner::new(config_in(dir.path(), &yaml)).unwrap();

    let err = runner.generate_once().await.unwrap_err();
    assert!(matches!(err, SubproxyError::Fetch(_)));
    assert!(!runner.config().sing_box.config_path.exists());
}
