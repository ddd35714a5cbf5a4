//! End-to-end smoke test for weave-node.
//!
//! Starts a real node process with a fresh genesis, submits a payment joint
//! via JSON-RPC, and asserts the balance change is correctly reflected.
//!
//! Run with:
//!   cargo test -p weave-node --test smoke

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use weave_core::constants::TOTAL_SUPPLY_BYTES;
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

async fn rpc_call(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let body = serde_json::json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1});
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap_or_else(|e| panic!("RPC call {method} failed: {e}"));
    let json: serde_json::Value = resp.json().await.expect("parse RPC JSON");
    if let Some(err) = json.get("error") {
        panic!("RPC error from {method}: {err}");
    }
    json["result"].clone()
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

async fn get_balance(client: &reqwest::Client, url: &str, address: &str) -> u128 {
    let result = rpc_call(client, url, "weave_getBalance", serde_json::json!([address, null])).await;
    result.as_str().unwrap().parse().expect("parse balance")
}

async fn post_joint(client: &reqwest::Client, url: &str, unit: &Unit) -> String {
    let bytes = bincode::serialize(unit).expect("serialize unit");
    let hex_str = hex::encode(bytes);
    let result = rpc_call(client, url, "weave_postJoint", serde_json::json!([hex_str])).await;
    result.as_str().expect("unit hash string").to_string()
}

/// Build and sign a single-author payment unit spending `src`'s entire
/// holding of `src`'s sole genesis output to `to`, parented directly on
/// genesis (so `check_last_ball` can skip the last-ball reference — see
/// `weave_validator::pipeline::Validator::check_last_ball`).
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
    let output = Output {
        address: to,
        amount,
        asset: Asset::Base,
        blinding: None,
        is_spent: false,
        denomination: None,
    };
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

#[tokio::test]
async fn smoke_payment_is_applied() {
    let data_dir = std::env::temp_dir().join(format!("weave_e2e_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);
    std::fs::create_dir_all(&data_dir).unwrap();

    let supply_kp = KeyPair::generate();
    let witnesses = (0..weave_core::constants::WITNESS_COUNT).map(|_| KeyPair::generate().address).collect();
    let params = GenesisParams {
        witnesses,
        supply_recipient: supply_kp.address,
        supply_recipient_definition: supply_kp.definition(),
    };
    let params_path = data_dir.join("genesis-params.json");
    std::fs::write(&params_path, serde_json::to_string(&params).unwrap()).unwrap();

    let rpc_port = free_port();
    let p2p_port = free_port();
    let rpc_url = format!("http://127.0.0.1:{rpc_port}");

    let node_bin = env!("CARGO_BIN_EXE_weave-node");
    let child = Command::new(node_bin)
        .args([
            "--data-dir",
            data_dir.join("state").to_str().unwrap(),
            "--rpc-addr",
            &format!("127.0.0.1:{rpc_port}"),
            "--p2p-listen",
            &format!("/ip4/127.0.0.1/tcp/{p2p_port}"),
            "--genesis-params",
            params_path.to_str().unwrap(),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn weave-node");

    let _guard = NodeGuard { child, data_dir };

    let http = reqwest::Client::new();
    assert!(wait_for_rpc(&http, &rpc_url, Duration::from_secs(20)).await, "weave-node did not become ready in time");

    let supply_b32 = supply_kp.address.to_b32();
    let genesis_balance = get_balance(&http, &rpc_url, &supply_b32).await;
    assert_eq!(genesis_balance, TOTAL_SUPPLY_BYTES, "supply recipient should hold the entire genesis issuance");

    let tips = rpc_call(&http, &rpc_url, "weave_getDagTips", serde_json::json!([])).await;
    let tips: Vec<String> = serde_json::from_value(tips).unwrap();
    let genesis_hash = weave_core::ids::UnitHash::from_hex(&tips[0]).unwrap();

    let alice = KeyPair::generate();
    let tx = build_payment(&supply_kp, genesis_hash, alice.address, 1_000);
    post_joint(&http, &rpc_url, &tx).await;

    tokio::time::sleep(Duration::from_millis(600)).await;

    let alice_balance = get_balance(&http, &rpc_url, &alice.address.to_b32()).await;
    assert_eq!(alice_balance, 1_000, "alice should have received 1000 base units");

    let supply_balance_after = get_balance(&http, &rpc_url, &supply_b32).await;
    assert_eq!(supply_balance_after, TOTAL_SUPPLY_BYTES - 1_000, "supply recipient should be reduced by 1000");
}
