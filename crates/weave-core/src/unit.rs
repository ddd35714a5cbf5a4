//! The DAG data model: [`Unit`], [`Message`], [`Author`], [`Output`], [`Input`]
//! and [`Ball`] (§3).

use serde::{Deserialize, Serialize};

use crate::ids::{Address, Amount, Asset, DilithiumSignature, MainChainIndex, Timestamp, UnitHash};

/// Serial/non-serial decision made for a unit at stabilization (§4.6).
///
/// Monotone transition: `TempBad -> (Good | FinalBad)`, never reversed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sequence {
    Good,
    TempBad,
    FinalBad,
}

/// Typed message payload kind (§3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppKind {
    Payment,
    Data,
    DataFeed,
    Asset,
    AssetAttestors,
    Attestation,
    Profile,
    Poll,
    Vote,
    Definition,
    Text,
    DefinitionTemplate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadLocation {
    Inline,
    None,
}

/// An unspent-output reference consumed by a payment message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputKind {
    Transfer,
    HeadersCommission,
    Witnessing,
    Issue,
}

/// `(unit, message_index, input_index, ...)` — references prior output(s).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub kind: InputKind,
    /// Transfer inputs reference exactly one output.
    pub src_unit: Option<UnitHash>,
    pub src_message_index: Option<u32>,
    pub src_output_index: Option<u32>,
    /// Strictly increasing per-address counter for indivisible (non-fungible-style) assets.
    pub serial_number: Option<u64>,
    /// Present for commission/issue inputs, which do not reference an output.
    pub amount: Option<Amount>,
    pub asset: Asset,
    pub address: Address,
}

/// `(unit, message_index, output_index, ...)`. Primary key is the triple.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub address: Address,
    pub amount: Amount,
    pub asset: Asset,
    /// Opt-in blinding factor for privacy-preserving amounts (out of core scope
    /// beyond carrying the field, per §1 Non-goals).
    pub blinding: Option<[u8; 16]>,
    pub is_spent: bool,
    pub denomination: Option<u32>,
}

/// A typed payload carried by a unit. Payment messages carry `inputs`/`outputs`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub app: AppKind,
    pub payload_location: PayloadLocation,
    pub payload_hash: [u8; 32],
    /// Present when `payload_location = Inline`.
    pub payload: Option<serde_json::Value>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

impl Message {
    pub fn is_payment(&self) -> bool {
        matches!(self.app, AppKind::Payment)
    }
}

/// `(unit, address, definition?, authentifiers)`.
///
/// The address is the chash of the author's definition. A definition is
/// published at most once per address; subsequent units reference it by
/// address alone (`definition = None`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub address: Address,
    /// Boolean-expression definition tree (see `weave_crypto::definition`), published
    /// at most once per address.
    pub definition: Option<serde_json::Value>,
    /// Proofs satisfying the definition, keyed by the path into it (e.g. `"r"` for
    /// a single `sig`, `"r.0"`/`"r.1"` for members of an `and`/`or`/`r_of_set`).
    pub authentifiers: std::collections::BTreeMap<String, DilithiumSignature>,
}

/// An immutable, authored, content-addressed DAG record (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Computed, not transmitted as part of the signed body — see `weave_crypto::unit_hash`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub unit_hash: Option<UnitHash>,
    pub version: String,
    pub alt_chain_id: String,
    /// Ordered set of parent unit hashes, length 1..16 (0 only for genesis).
    pub parent_units: Vec<UnitHash>,
    pub last_ball: Option<crate::ids::BallHash>,
    pub last_ball_unit: Option<UnitHash>,
    pub witness_list_unit: Option<UnitHash>,
    pub headers_commission: u32,
    pub payload_commission: u32,
    pub authors: Vec<Author>,
    pub messages: Vec<Message>,
    pub timestamp: Timestamp,

    // ── Fields computed and persisted by the engine, not signed over ─────────
    #[serde(default)]
    pub main_chain_index: Option<MainChainIndex>,
    #[serde(default)]
    pub level: u64,
    #[serde(default)]
    pub latest_included_mc_index: Option<MainChainIndex>,
    #[serde(default)]
    pub is_on_main_chain: bool,
    #[serde(default)]
    pub is_stable: bool,
    #[serde(default)]
    pub is_free: bool,
    #[serde(default = "default_sequence")]
    pub sequence: Sequence,
}

fn default_sequence() -> Sequence {
    Sequence::TempBad
}

impl Unit {
    pub fn is_genesis(&self) -> bool {
        self.parent_units.is_empty()
    }

    /// All addresses authoring this unit.
    pub fn author_addresses(&self) -> Vec<Address> {
        self.authors.iter().map(|a| a.address).collect()
    }
}

/// Projected, cache/DB-resident summary of a unit (§4.3 `UnitProps`).
/// Cheaper to move around than a full [`Unit`] for graph-query purposes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitProps {
    pub unit_hash: UnitHash,
    pub parent_units: Vec<UnitHash>,
    pub level: u64,
    pub witnessed_level: u64,
    pub latest_included_mc_index: Option<MainChainIndex>,
    pub main_chain_index: Option<MainChainIndex>,
    pub is_on_main_chain: bool,
    pub is_stable: bool,
    pub is_free: bool,
    pub sequence: Sequence,
    pub best_parent_unit: Option<UnitHash>,
    pub witness_list_unit: Option<UnitHash>,
    pub author_addresses: Vec<Address>,
    pub timestamp: Timestamp,
}

/// `ball_hash = H(unit, sorted(parent_balls), sorted(skiplist_balls), is_nonserial)`.
/// Exists only for stable units (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub ball_hash: crate::ids::BallHash,
    pub unit: UnitHash,
    pub parent_balls: Vec<crate::ids::BallHash>,
    pub skiplist_balls: Vec<crate::ids::BallHash>,
    pub is_nonserial: bool,
}
