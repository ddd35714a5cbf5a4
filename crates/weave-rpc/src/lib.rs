//! weave-rpc
//!
//! JSON-RPC 2.0 server for Weave nodes.
//!
//! Namespace: "weave"
//! Methods:
//!   weave_getUnit           — a unit by hex unit hash
//!   weave_getBalance        — spendable balance of an address, by asset
//!   weave_postJoint         — submit a joint (hex-encoded bincode(Unit))
//!   weave_getDagTips        — current free units (DAG tips)
//!   weave_getAaState        — one Autonomous Agent state variable
//!   weave_getNetworkInfo    — this node's P2P bootstrap address
//!   weave_getVersion        — node/protocol version
//!   weave_getStabilityInfo  — last stable mci and witness list

pub mod api;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerState};
pub use types::{RpcNetworkInfo, RpcStabilityInfo, RpcUnit, RpcVersionInfo};
