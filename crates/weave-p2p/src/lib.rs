//! weave-p2p
//!
//! libp2p networking layer for Weave nodes.
//!
//! GossipSub broadcasts new joints to all connected peers ("justsaying").
//! A `request_response` channel carries the tagged `get_joint`/`catchup`/
//! `hash_tree`/`get_witnesses` exchanges a new or lagging node needs to
//! catch up (§4.10). Kademlia DHT handles peer discovery and bootstrap.
//! Identify and Ping maintain connection metadata and liveness.

pub mod config;
pub mod message;
pub mod network;
pub mod pending;
pub mod unhandled;
pub mod witness_proof;

pub use config::P2pConfig;
pub use message::{GossipMessage, VersionInfo, WireRequest, WireResponse};
pub use network::{Inbound, Outbound, P2pHandle, P2pNetwork, WeaveBehaviour};
pub use pending::{PendingRequestTable, Register};
pub use unhandled::UnhandledJoints;
pub use witness_proof::{prepare_catchup_chain, prepare_witness_proof, WitnessProof};
