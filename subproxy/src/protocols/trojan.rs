use super::{endpoint, fragment_name, parse_url, percent_decode, query_param};
use crate::types::{NodeCandidate, Outbound, Result, SubproxyError, TlsOptions, TrojanOutbound};

pub fn parse(link: &str) -> Result<NodeCandidate> {
    let url = parse_url(link)?;
    let (server, server_port) = endpoint(&url)?;
    let password = percent_decode(url.username());
    if password.is_empty() {
        return Err(SubproxyError::decode("trojan link missing password"));
    }

    let server_name = query_param(&url, "sni")
        .or_else(|| query_param(&url, "peer"))
        .unwrap_or_else(|| server.clone());

    Ok(NodeCandidate::subscription(
        fragment_name(&url, "trojan"),
        Outbound::Trojan(TrojanOutbound {
            server,
            server_port,
            password,
            tls: TlsOptions::enabled(server_name),
        }),
    ))
}
