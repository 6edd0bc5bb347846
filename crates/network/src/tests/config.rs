use claims::{assert_err, assert_ok};
use serde::Deserialize;

use super::*;

#[derive(Debug, Deserialize)]
struct Wrapper {
    bootstrap: BootstrapConfig,
}

#[test]
fn bootstrap_addresses_need_a_peer_id() {
    let with_peer = r#"
        [bootstrap]
        nodes = ["/ip4/10.0.0.1/tcp/2428/p2p/12D3KooWMgoF9xzyeKJHtRvrYwdomheRbHPELagWZwTLmXb6bCVC"]
    "#;
    let without_peer = r#"
        [bootstrap]
        nodes = ["/ip4/10.0.0.1/tcp/2428"]
    "#;

    let parsed: Wrapper = assert_ok!(toml::from_str(with_peer));

    assert_eq!(parsed.bootstrap.nodes.list.len(), 1, "one bootstrap node");
    let _ = assert_err!(toml::from_str::<Wrapper>(without_peer));
}

#[test]
fn missing_bootstrap_nodes_default_to_empty() {
    let parsed: Wrapper = assert_ok!(toml::from_str("[bootstrap]"));

    assert!(parsed.bootstrap.nodes.list.is_empty(), "no bootstrap nodes");
}

#[test]
fn default_listen_covers_tcp_and_quic() {
    let config = ListenConfig::default();

    assert_eq!(config.listen.len(), 4, "two hosts, two transports each");
    assert!(
        config
            .listen
            .iter()
            .any(|addr| addr.iter().any(|proto| proto == Protocol::QuicV1)),
        "a QUIC address is present"
    );
    assert!(
        config.listen.iter().all(|addr| addr
            .iter()
            .any(|proto| matches!(proto, Protocol::Tcp(DEFAULT_PORT) | Protocol::Udp(DEFAULT_PORT)))),
        "every address uses the default port"
    );
}
