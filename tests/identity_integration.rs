//! Identity remapper integration tests
//!
//! Covers first-bootstrap map creation, rewrite-on-churn with prefix-safe
//! scoping, and idempotence when addresses are stable.

#[allow(dead_code)]
mod common;

use common::TestEnv;
use corral::identity::{IdentityMap, IdentityRemapper};
use corral::resolve::{NodeDescriptor, PeerResolver};
use corral::retry::RetryPolicy;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

fn resolver() -> PeerResolver {
    PeerResolver::new(RetryPolicy::new(2, Duration::from_millis(20)))
}

fn peers(raw: &[&str]) -> Vec<NodeDescriptor> {
    raw.iter()
        .map(|token| NodeDescriptor::parse(token, 6379).unwrap())
        .collect()
}

#[tokio::test]
async fn test_first_run_records_addresses() {
    let env = TestEnv::new();
    let map_path = env.data_dir.join("corral-addresses.json");
    let identity_path = env.data_dir.join("nodes.conf");

    let resolver = resolver();
    let peers = peers(&["localhost:7000", "127.0.0.1:7001"]);
    IdentityRemapper::new(&resolver, &peers, &map_path, &identity_path)
        .run()
        .await
        .unwrap();

    let map = IdentityMap::load(&map_path).unwrap().unwrap();
    assert_eq!(map.addresses.len(), 2);
    for ip in map.addresses.values() {
        assert!(ip.is_loopback());
    }
    // No identity file was invented.
    assert!(!identity_path.exists());
}

#[tokio::test]
async fn test_ip_churn_rewrites_identity_file() {
    let env = TestEnv::new();
    let map_path = env.data_dir.join("corral-addresses.json");
    let identity_path = env.data_dir.join("nodes.conf");

    // A previous life recorded a now-stale address for this peer, plus a
    // neighbor whose literal extends the stale one by one digit.
    let stale: IpAddr = "10.0.0.5".parse().unwrap();
    let mut addresses = BTreeMap::new();
    addresses.insert("127.0.0.1:7000".to_string(), stale);
    IdentityMap::new(addresses).save(&map_path).unwrap();

    std::fs::write(
        &identity_path,
        "node-a 10.0.0.5:7000@17000 myself,master - 0 0 1 connected 0-8191\n\
         node-b 10.0.0.55:7000@17000 master - 0 0 2 connected 8192-16383\n",
    )
    .unwrap();

    let resolver = resolver();
    let peers = peers(&["127.0.0.1:7000"]);
    IdentityRemapper::new(&resolver, &peers, &map_path, &identity_path)
        .run()
        .await
        .unwrap();

    let content = std::fs::read_to_string(&identity_path).unwrap();
    assert!(content.contains("127.0.0.1:7000@17000"), "{content}");
    assert!(
        content.contains("10.0.0.55:7000@17000"),
        "longer literal was clobbered: {content}"
    );
    assert!(!content.contains("10.0.0.5:"), "{content}");

    let map = IdentityMap::load(&map_path).unwrap().unwrap();
    let recorded = map.addresses.get("127.0.0.1:7000").unwrap();
    assert_eq!(recorded.to_string(), "127.0.0.1");
}

#[tokio::test]
async fn test_stable_addresses_leave_files_untouched() {
    let env = TestEnv::new();
    let map_path = env.data_dir.join("corral-addresses.json");
    let identity_path = env.data_dir.join("nodes.conf");

    let resolver = resolver();
    let descriptors = peers(&["127.0.0.1:7000"]);

    IdentityRemapper::new(&resolver, &descriptors, &map_path, &identity_path)
        .run()
        .await
        .unwrap();
    let map_once = std::fs::read(&map_path).unwrap();

    std::fs::write(&identity_path, "node-a 127.0.0.1:7000@17000 myself\n").unwrap();
    let identity_once = std::fs::read(&identity_path).unwrap();

    IdentityRemapper::new(&resolver, &descriptors, &map_path, &identity_path)
        .run()
        .await
        .unwrap();

    assert_eq!(std::fs::read(&map_path).unwrap(), map_once);
    assert_eq!(std::fs::read(&identity_path).unwrap(), identity_once);
}

#[tokio::test]
async fn test_new_peer_is_added_to_map() {
    let env = TestEnv::new();
    let map_path = env.data_dir.join("corral-addresses.json");
    let identity_path = env.data_dir.join("nodes.conf");

    let resolver = resolver();
    IdentityRemapper::new(&resolver, &peers(&["127.0.0.1:7000"]), &map_path, &identity_path)
        .run()
        .await
        .unwrap();

    // Scale-out adds a peer; the map gains exactly one entry.
    IdentityRemapper::new(
        &resolver,
        &peers(&["127.0.0.1:7000", "127.0.0.1:7001"]),
        &map_path,
        &identity_path,
    )
    .run()
    .await
    .unwrap();

    let map = IdentityMap::load(&map_path).unwrap().unwrap();
    assert_eq!(map.addresses.len(), 2);
    assert!(map.addresses.contains_key("127.0.0.1:7001"));
}
