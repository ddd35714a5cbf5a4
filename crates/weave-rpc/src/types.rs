use serde::{Deserialize, Serialize};

/// P2P network identity returned by `weave_getNetworkInfo`.
/// The `peer_multiaddr` field is the full libp2p multiaddress (including
/// `/p2p/<PeerId>`) that other nodes should pass as `--bootstrap` to
/// connect to this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNetworkInfo {
    pub peer_multiaddr: String,
}

/// JSON-serializable unit summary returned by `weave_getUnit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcUnit {
    pub unit_hash: String,
    pub parent_units: Vec<String>,
    pub author_addresses: Vec<String>,
    pub timestamp: i64,
    pub main_chain_index: Option<u64>,
    pub level: u64,
    pub witnessed_level: u64,
    pub is_on_main_chain: bool,
    pub is_stable: bool,
    pub is_free: bool,
    pub message_count: usize,
}

/// Node / protocol version information returned by `weave_getVersion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcVersionInfo {
    pub node_version: String,
    pub protocol_version: String,
}

/// Stability snapshot returned by `weave_getStabilityInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcStabilityInfo {
    pub last_stable_mci: Option<u64>,
    pub witnesses: Vec<String>,
}
