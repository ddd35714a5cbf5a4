//! Wire types for both channels: `GossipMessage` over gossipsub (justsaying
//! broadcast of new joints), `WireRequest`/`WireResponse` over
//! `request_response` (§4.10's tagged `get_joint`/`catchup`/`hash_tree`/
//! `get_witnesses`). `libp2p::request_response::cbor::Behaviour` derives the
//! codec from these types' `Serialize`/`Deserialize` impls directly, so
//! there is no hand-written framing here beyond the size check below.

use serde::{Deserialize, Serialize};

use weave_core::constants::{MAX_MESSAGE_SIZE, MAX_VERSION_STRING_BYTES};
use weave_core::ids::{Address, MainChainIndex, UnitHash};
use weave_core::unit::{Ball, Unit};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    /// A peer is broadcasting a newly authored joint.
    Joint(Unit),
}

impl GossipMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("GossipMessage serialization is infallible")
    }

    /// Rejects oversized frames without allocating a decode buffer for them
    /// (P8, §4.10 point 1) before ever calling into bincode.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(Box::new(bincode::ErrorKind::SizeLimit));
        }
        bincode::deserialize(bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireRequest {
    GetJoint { unit: UnitHash },
    Catchup { from_mci: MainChainIndex, to_mci: MainChainIndex },
    HashTree { from_mci: MainChainIndex, to_mci: MainChainIndex },
    GetWitnesses,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireResponse {
    Joint(Option<Unit>),
    Catchup(Vec<Ball>),
    HashTree(Vec<(MainChainIndex, UnitHash)>),
    Witnesses(Vec<Address>),
    Error(String),
}

/// Exchanged so a peer can drop connections from a different protocol
/// generation before spending bandwidth on joints it would reject anyway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub program: String,
    pub program_version: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self { program: "weave-node".into(), program_version: env!("CARGO_PKG_VERSION").into() }
    }

    pub fn is_well_formed(&self) -> bool {
        self.program.len() <= MAX_VERSION_STRING_BYTES && self.program_version.len() <= MAX_VERSION_STRING_BYTES
    }
}
