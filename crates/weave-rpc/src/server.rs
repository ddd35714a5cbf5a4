use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use weave_core::ids::{Address, Asset, AssetId, UnitHash};
use weave_core::unit::Unit;
use weave_state::StateDb;

use crate::api::WeaveApiServer;
use crate::types::{RpcNetworkInfo, RpcStabilityInfo, RpcUnit, RpcVersionInfo};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

fn parse_asset(s: Option<&str>) -> Result<Asset, String> {
    match s {
        None | Some("base") | Some("") => Ok(Asset::Base),
        Some(hex_id) => {
            let hash = UnitHash::from_hex(hex_id).map_err(|e| format!("invalid asset id: {e}"))?;
            Ok(Asset::Issued(AssetId(hash)))
        }
    }
}

/// Shared state passed to the RPC server.
pub struct RpcServerState {
    pub db: Arc<StateDb>,
    /// Sender to forward submitted joints to the node's validation pipeline.
    /// `None` if this RPC server was started read-only.
    pub unit_sender: Option<tokio::sync::mpsc::Sender<Unit>>,
    /// Full libp2p multiaddress of this node (e.g. `/ip4/127.0.0.1/tcp/7777/p2p/<PeerId>`).
    /// Used by peers to bootstrap; returned by `weave_getNetworkInfo`.
    pub peer_multiaddr: Option<String>,
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers. Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

#[async_trait]
impl WeaveApiServer for RpcServer {
    async fn get_unit(&self, unit_hash: String) -> RpcResult<Option<RpcUnit>> {
        let hash =
            UnitHash::from_hex(&unit_hash).map_err(|e| rpc_err(-32602, format!("invalid unit hash: {e}")))?;

        let Some(props) = self.state.db.get_props(&hash).map_err(|e| rpc_err(-32603, e.to_string()))?
        else {
            return Ok(None);
        };
        let message_count = self
            .state
            .db
            .get_unit(&hash)
            .map_err(|e| rpc_err(-32603, e.to_string()))?
            .map(|u: Unit| u.messages.len())
            .unwrap_or(0);

        Ok(Some(RpcUnit {
            unit_hash: props.unit_hash.to_hex(),
            parent_units: props.parent_units.iter().map(UnitHash::to_hex).collect(),
            author_addresses: props.author_addresses.iter().map(Address::to_b32).collect(),
            timestamp: props.timestamp,
            main_chain_index: props.main_chain_index,
            level: props.level,
            witnessed_level: props.witnessed_level,
            is_on_main_chain: props.is_on_main_chain,
            is_stable: props.is_stable,
            is_free: props.is_free,
            message_count,
        }))
    }

    async fn get_balance(&self, address: String, asset: Option<String>) -> RpcResult<String> {
        let addr = Address::from_b32(&address).ok_or_else(|| rpc_err(-32602, "invalid address"))?;
        let asset = parse_asset(asset.as_deref()).map_err(|e| rpc_err(-32602, e))?;

        let balance = if self.state.db.is_aa(&addr) {
            self.state.db.get_balance(&addr, &asset)
        } else {
            self.state.db.get_address_balance(&addr, &asset)
        }
        .map_err(|e| rpc_err(-32603, e.to_string()))?;

        Ok(balance.to_string())
    }

    async fn post_joint(&self, unit_hex: String) -> RpcResult<String> {
        let bytes = hex::decode(&unit_hex).map_err(|e| rpc_err(-32602, format!("invalid hex: {e}")))?;
        let mut unit: Unit = bincode::deserialize(&bytes)
            .map_err(|e| rpc_err(-32602, format!("invalid unit encoding: {e}")))?;

        let hash = weave_crypto::unit_hash(&unit)
            .map_err(|e| rpc_err(-32602, format!("unit does not canonicalize: {e}")))?;
        unit.unit_hash = Some(hash);

        match &self.state.unit_sender {
            Some(sender) => {
                sender
                    .send(unit)
                    .await
                    .map_err(|_| rpc_err(-32603, "joint ingress queue full"))?;
            }
            None => {
                warn!("RPC: postJoint called but no ingress pipeline configured");
                return Err(rpc_err(-32603, "node ingress pipeline not connected").into());
            }
        }

        Ok(hash.to_hex())
    }

    async fn get_dag_tips(&self) -> RpcResult<Vec<String>> {
        let tips = self.state.db.get_free_units().map_err(|e| rpc_err(-32603, e.to_string()))?;
        Ok(tips.into_iter().map(|t| t.to_hex()).collect())
    }

    async fn get_aa_state(
        &self,
        address: String,
        var_name: String,
    ) -> RpcResult<Option<serde_json::Value>> {
        let addr = Address::from_b32(&address).ok_or_else(|| rpc_err(-32602, "invalid address"))?;
        let value = self
            .state
            .db
            .get_state_var(&addr, &var_name)
            .map_err(|e| rpc_err(-32603, e.to_string()))?;

        match value {
            None => Ok(None),
            Some(v) => serde_json::to_value(v)
                .map(Some)
                .map_err(|e| rpc_err(-32603, e.to_string()).into()),
        }
    }

    async fn get_network_info(&self) -> RpcResult<RpcNetworkInfo> {
        Ok(RpcNetworkInfo { peer_multiaddr: self.state.peer_multiaddr.clone().unwrap_or_default() })
    }

    async fn get_version(&self) -> RpcResult<RpcVersionInfo> {
        Ok(RpcVersionInfo {
            node_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: "1.0".to_string(),
        })
    }

    async fn get_stability_info(&self) -> RpcResult<RpcStabilityInfo> {
        let last_stable_mci = self.state.db.last_stable_mci().map_err(|e| rpc_err(-32603, e.to_string()))?;
        let witnesses = self
            .state
            .db
            .witness_list()
            .map_err(|e| rpc_err(-32603, e.to_string()))?
            .unwrap_or_default()
            .iter()
            .map(Address::to_b32)
            .collect();
        Ok(RpcStabilityInfo { last_stable_mci, witnesses })
    }
}
