//! P2P integration test for weave-node.
//!
//! Starts two node processes sharing the same genesis: node A is the
//! bootstrap node, node B dials in. A payment submitted on node A must
//! propagate to node B via GossipSub and be reflected in its balance.
//!
//! Run with:
//!   cargo test -p weave-node --test p2p

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use weave_core::ids::Asset;
use weave_core::unit::{
    AppKind, Author, Input, InputKind, Message, Output, PayloadLocation, Sequence, Unit,
};
use weave_crypto::KeyPair;
use weave_genesis::GenesisParams;

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

async fn rpc_call(client: &reqwest::Client, url: &str, method: &str, params: serde_json::Value) -> Option<serde_json::Value> {
    let body = serde_json::json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1});
    let resp = client.post(url).json(&body).send().await.ok()?;
    let json: serde_json::Value = resp.json().await.ok()?;
    if json.get("error").is_some() {
        return None;
    }
    Some(json["result"].clone())
}

async fn rpc_call_unwrap(client: &reqwest::Client, url: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
    rpc_call(client, url, method, params).await.unwrap_or_else(|| panic!("RPC call {method} returned error/none"))
}

async fn wait_for_rpc(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let body = serde_json::json!({"jsonrpc": "2.0", "method": "weave_getVersion", "params": [], "id": 1});
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.post(url).json(&body).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

async fn get_peer_multiaddr(client: &reqwest::Client, url: &str) -> String {
    let result = rpc_call_unwrap(client, url, "weave_getNetworkInfo", serde_json::json!([])).await;
    result["peer_multiaddr"].as_str().expect("peer_multiaddr field").to_string()
}

async fn get_balance(client: &reqwest::Client, url: &str, address: &str) -> u128 {
    let result = rpc_call_unwrap(client, url, "weave_getBalance", serde_json::json!([address, null])).await;
    result.as_str().unwrap().parse().unwrap()
}

async fn get_dag_tips(client: &reqwest::Client, url: &str) -> Vec<String> {
    let result = rpc_call_unwrap(client, url, "weave_getDagTips", serde_json::json!([])).await;
    serde_json::from_value(result).unwrap()
}

async fn post_joint(client: &reqwest::Client, url: &str, unit: &Unit) -> String {
    let bytes = bincode::serialize(unit).unwrap();
    let hex_str = hex::encode(bytes);
    let result = rpc_call_unwrap(client, url, "weave_postJoint", serde_json::json!([hex_str])).await;
    result.as_str().unwrap().to_string()
}

/// Poll until `weave_getUnit` reports `unit_hash` on the given node.
async fn wait_for_unit(client: &reqwest::Client, url: &str, unit_hash: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let result = rpc_call(client, url, "weave_getUnit", serde_json::json!([unit_hash])).await;
        if let Some(v) = result {
            if !v.is_null() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    false
}

fn build_payment(src: &KeyPair, genesis_hash: weave_core::ids::UnitHash, to: weave_core::ids::Address, amount: u128) -> Unit {
    let input = Input {
        kind: InputKind::Transfer,
        src_unit: Some(genesis_hash),
        src_message_index: Some(0),
        src_output_index: Some(0),
        serial_number: None,
        amount: None,
        asset: Asset::Base,
        address: src.address,
    };
    let output = Output { address: to, amount, asset: Asset::Base, blinding: None, is_spent: false, denomination: None };
    let message = Message {
        app: AppKind::Payment,
        payload_location: PayloadLocation::None,
        payload_hash: [0u8; 32],
        payload: None,
        inputs: vec![input],
        outputs: vec![output],
    };
    let mut unit = Unit {
        unit_hash: None,
        version: "1.0".into(),
        alt_chain_id: String::new(),
        parent_units: vec![genesis_hash],
        last_ball: None,
        last_ball_unit: None,
        witness_list_unit: None,
        headers_commission: 0,
        payload_commission: 0,
        authors: vec![Author { address: src.address, definition: None, authentifiers: BTreeMap::new() }],
        messages: vec![message],
        timestamp: 1_767_225_700,
        main_chain_index: None,
        level: 0,
        latest_included_mc_index: None,
        is_on_main_chain: false,
        is_stable: false,
        is_free: true,
        sequence: Sequence::TempBad,
    };
    let value = weave_crypto::canonical::unit_to_canonical_value(&unit);
    let message_bytes = weave_crypto::canonical_bytes(&value, true).expect("unit canonicalizes");
    let sig = src.sign(&message_bytes);
    unit.authors[0].authentifiers.insert("r".into(), sig);
    unit
}

fn genesis_params_for(dir: &PathBuf) -> (KeyPair, PathBuf) {
    let supply_kp = KeyPair::generate();
    let witnesses = (0..weave_core::constants::WITNESS_COUNT).map(|_| KeyPair::generate().address).collect();
    let params = GenesisParams { witnesses, supply_recipient: supply_kp.address, supply_recipient_definition: supply_kp.definition() };
    let params_path = dir.join("genesis-params.json");
    std::fs::write(&params_path, serde_json::to_string(&params).unwrap()).unwrap();
    (supply_kp, params_path)
}

fn spawn_node(data_dir: &PathBuf, rpc_port: u16, p2p_port: u16, params_path: &PathBuf, bootstrap: Option<&str>) -> Child {
    let node_bin = env!("CARGO_BIN_EXE_weave-node");
    let mut cmd = Command::new(node_bin);
    cmd.args([
        "--data-dir",
        data_dir.join("state").to_str().unwrap(),
        "--rpc-addr",
        &format!("127.0.0.1:{rpc_port}"),
        "--p2p-listen",
        &format!("/ip4/127.0.0.1/tcp/{p2p_port}"),
        "--genesis-params",
        params_path.to_str().unwrap(),
    ]);
    if let Some(bs) = bootstrap {
        cmd.args(["--bootstrap", bs]);
    }
    cmd.stdout(Stdio::null()).stderr(Stdio::null()).spawn().expect("failed to spawn weave-node")
}

#[tokio::test]
async fn p2p_gossip_propagation() {
    let http = reqwest::Client::new();

    let base_dir = std::env::temp_dir().join(format!("weave_p2p_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&base_dir);

    let dir_a = base_dir.join("node_a");
    let dir_b = base_dir.join("node_b");
    std::fs::create_dir_all(&dir_a).unwrap();
    std::fs::create_dir_all(&dir_b).unwrap();

    let (supply_kp, params_path_a) = genesis_params_for(&dir_a);
    let params_path_b = dir_b.join("genesis-params.json");
    std::fs::copy(&params_path_a, &params_path_b).unwrap();

    let rpc_a = free_port();
    let p2p_a = free_port();
    let url_a = format!("http://127.0.0.1:{rpc_a}");

    let child_a = spawn_node(&dir_a, rpc_a, p2p_a, &params_path_a, None);
    let _guard_a = NodeGuard { child: child_a, data_dir: dir_a };

    assert!(wait_for_rpc(&http, &url_a, Duration::from_secs(20)).await, "node A did not become ready");

    let peer_multiaddr_a = get_peer_multiaddr(&http, &url_a).await;
    assert!(peer_multiaddr_a.contains("/p2p/"), "expected /p2p/ in multiaddr, got: {peer_multiaddr_a}");

    let rpc_b = free_port();
    let p2p_b = free_port();
    let url_b = format!("http://127.0.0.1:{rpc_b}");

    let child_b = spawn_node(&dir_b, rpc_b, p2p_b, &params_path_b, Some(&peer_multiaddr_a));
    let _guard_b = NodeGuard { child: child_b, data_dir: base_dir };

    assert!(wait_for_rpc(&http, &url_b, Duration::from_secs(20)).await, "node B did not become ready");

    // GossipSub heartbeat fires every second; give the mesh time to form.
    tokio::time::sleep(Duration::from_secs(4)).await;

    let tips = get_dag_tips(&http, &url_a).await;
    let genesis_hash = weave_core::ids::UnitHash::from_hex(&tips[0]).unwrap();

    let alice = KeyPair::generate();
    let tx = build_payment(&supply_kp, genesis_hash, alice.address, 500);
    let unit_hash_hex = post_joint(&http, &url_a, &tx).await;

    assert!(wait_for_unit(&http, &url_a, &unit_hash_hex, Duration::from_secs(5)).await, "node A did not apply the joint");
    assert!(
        wait_for_unit(&http, &url_b, &unit_hash_hex, Duration::from_secs(10)).await,
        "node B did not receive the joint via GossipSub within 10 seconds"
    );

    let alice_b32 = alice.address.to_b32();
    let bal_a = get_balance(&http, &url_a, &alice_b32).await;
    let bal_b = get_balance(&http, &url_b, &alice_b32).await;
    assert_eq!(bal_a, 500, "node A: wrong alice balance");
    assert_eq!(bal_b, 500, "node B: wrong alice balance");
    assert_eq!(bal_a, bal_b, "nodes disagree on alice's balance");
}
