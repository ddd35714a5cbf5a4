use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{RpcNetworkInfo, RpcStabilityInfo, RpcUnit, RpcVersionInfo};

/// Weave JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "weave_" via `namespace = "weave"`.
#[rpc(server, namespace = "weave")]
pub trait WeaveApi {
    /// Get a unit by its hex-encoded unit hash.
    #[method(name = "getUnit")]
    async fn get_unit(&self, unit_hash: String) -> RpcResult<Option<RpcUnit>>;

    /// Get the spendable balance of an address for an asset. `asset` is
    /// `"base"` (default when omitted) or a hex-encoded asset-defining unit
    /// hash for an issued asset.
    #[method(name = "getBalance")]
    async fn get_balance(&self, address: String, asset: Option<String>) -> RpcResult<String>;

    /// Submit a joint. `unit_hex` is hex-encoded bincode(Unit). Returns the
    /// unit hash hex on successful hand-off to the validation pipeline —
    /// this does not wait for the joint to be validated or saved.
    #[method(name = "postJoint")]
    async fn post_joint(&self, unit_hex: String) -> RpcResult<String>;

    /// Return the current DAG tips (free units) as hex unit hashes.
    #[method(name = "getDagTips")]
    async fn get_dag_tips(&self) -> RpcResult<Vec<String>>;

    /// Read one Autonomous Agent state variable. Returns `null` if the AA or
    /// the variable does not exist.
    #[method(name = "getAaState")]
    async fn get_aa_state(
        &self,
        address: String,
        var_name: String,
    ) -> RpcResult<Option<serde_json::Value>>;

    /// Return the node's P2P identity (peer multiaddress).
    /// Other nodes pass this as `--bootstrap` to connect.
    #[method(name = "getNetworkInfo")]
    async fn get_network_info(&self) -> RpcResult<RpcNetworkInfo>;

    /// Return node and protocol version information.
    #[method(name = "getVersion")]
    async fn get_version(&self) -> RpcResult<RpcVersionInfo>;

    /// Return the last stable main-chain index and the current witness list.
    #[method(name = "getStabilityInfo")]
    async fn get_stability_info(&self) -> RpcResult<RpcStabilityInfo>;
}
