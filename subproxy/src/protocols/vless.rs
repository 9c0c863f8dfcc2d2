use super::{endpoint, fragment_name, parse_url, percent_decode, query_param};
use crate::types::{NodeCandidate, Outbound, Result, SubproxyError, TlsOptions, Transport, VlessOutbound};

pub fn parse(link: &str) -> Result<NodeCandidate> {
    let url = parse_url(link)?;
    let (server, server_port) = endpoint(&url)?;
    let uuid = percent_decode(url.username());
    if uuid.is_empty() {
        return Err(SubproxyError::decode("vless link missing uuid"));
    }

    let host = query_param(&url, "host").unwrap_or_default();

    let tls = (query_param(&url, "security").as_deref() == Some("tls")).then(|| {
        let server_name = query_param(&url, "sni")
            .or_else(|| (!host.is_empty()).then(|| host.clone()))
            .unwrap_or_else(|| server.clone());
        TlsOptions::enabled(server_name)
    });

    let transport = (query_param(&url, "type").as_deref() == Some("ws")).then(|| {
        let path = query_param(&url, "path").unwrap_or_default();
        Transport::websocket(&path, &host)
    });

    Ok(NodeCandidate::subscription(
        fragment_name(&url, "vless"),
        Outbound::Vless(VlessOutbound {
            server,
            server_port,
            uuid,
            tls,
            transport,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "00000000-0000-0000-0000-000000000001";

    fn outbound(node: &NodeCandidate) -> &VlessOutbound {
        match &node.outbound {
            Outbound::Vless(vless) => vless,
            other => panic!("expected vless, got {:?}", other),
        }
    }

    #[test]
    fn test_vless_tls_websocket() {
        let link = format!(
            "vless://{}@vless.example.com:443?security=tls&type=ws&host=example.com&path=%2Fws#Vless-Node",
            UUID
        );
        let node = parse(&link).unwrap();
        assert_eq!(node.name, "Vless-Node");

        let vless = outbound(&node);
        assert_eq!(vless.uuid, UUID);
        let tls = vless.tls.as_ref().unwrap();
        assert!(tls.enabled);
        assert_eq!(tls.server_name, "example.com");

        let transport = vless.transport.as_ref().unwrap();
        assert_eq!(transport.kind, "ws");
        assert_eq!(transport.path, "/ws");
        assert_eq!(transport.headers.as_ref().unwrap()["Host"], "example.com");
    }

    #[test]
    fn test_vless_plain() {
        let node = parse(&format!("vless://{}@v.example.com:8080", UUID)).unwrap();
        assert_eq!(node.name, "vless");

        let vless = outbound(&node);
        assert_eq!(vless.server_port, 8080);
        assert!(vless.tls.is_none());
        assert!(vless.transport.is_none());

        let fields = node.outbound.to_fields().unwrap();
        assert!(!fields.contains_key("tls"));
        assert!(!fields.contains_key("transport"));
    }

    #[test]
    fn test_vless_ws_without_host_or_path() {
        let node = parse(&format!("vless://{}@v.example.com?type=ws&security=tls&sni=s.example.com", UUID)).unwrap();
        let vless = outbound(&node);
        assert_eq!(vless.server_port, 443);
        assert_eq!(vless.tls.as_ref().unwrap().server_name, "s.example.com");

        let transport = vless.transport.as_ref().unwrap();
        assert_eq!(transport.path, "/");
        assert!(transport.headers.is_none());
    }

    #[test]
    fn test_vless_requires_uuid() {
        assert!(parse("vless://v.example.com:443").is_err());
    }
}
