//! Autonomous Agent data model: definitions, state variables, balances and
//! trigger queue rows (§3, §4.9).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{Address, Amount, Asset, MainChainIndex, UnitHash};

/// Sentinel that must be the first element of a `definition` message's payload
/// for it to be recognised as an AA rather than an ordinary address definition.
pub const AA_SENTINEL: &str = "autonomous agent";

/// A published AA definition template (second element of the `definition` payload).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AaDefinition {
    pub address: Address,
    pub unit: UnitHash,
    pub mci: MainChainIndex,
    /// `{init}` formula evaluated once per trigger before `messages`.
    pub init: Option<String>,
    /// Either a flat list of message templates or a `cases` list of
    /// `{if, messages}` entries evaluated in order.
    pub messages: AaMessagesTemplate,
    /// Per-asset minimum amounts required to avoid an immediate bounce;
    /// `"base"` is the implicit default for any asset not listed.
    pub bounce_fees: BTreeMap<String, Amount>,
    /// Base AA this definition derives from, with `params` substituted in.
    pub base_aa: Option<Address>,
    pub params: BTreeMap<String, serde_json::Value>,
    /// Read-only formulas exposed for off-chain querying; never mutate state.
    pub getters: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AaMessagesTemplate {
    Flat(Vec<serde_json::Value>),
    Cases(Vec<AaCase>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AaCase {
    pub if_formula: Option<String>,
    pub messages: Vec<serde_json::Value>,
}

/// A value an AA state variable can hold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AaValue {
    Decimal(rust_decimal::Decimal),
    String(String),
    Bool(bool),
    Json(serde_json::Value),
}

impl AaValue {
    pub fn type_tag(&self) -> u8 {
        match self {
            AaValue::Decimal(_) => b'n',
            AaValue::String(_) => b's',
            AaValue::Bool(_) => b'b',
            AaValue::Json(_) => b'j',
        }
    }
}

/// `(aa_address, var_name) -> value`, persisted under `st\n{address}\n{name}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AaStateVar {
    pub address: Address,
    pub name: String,
    pub value: AaValue,
}

/// `(aa_address, asset) -> integer amount`, kept consistent with I7.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AaBalance {
    pub address: Address,
    pub asset: Asset,
    pub amount: Amount,
}

/// A queue row created when a stabilized unit pays an AA.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AaTrigger {
    pub mci: MainChainIndex,
    pub unit: UnitHash,
    pub address: Address,
}

/// Outcome of composing one trigger, recorded in `aa_responses`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AaResponse {
    pub mci: MainChainIndex,
    pub trigger_unit: UnitHash,
    pub aa_address: Address,
    pub response_unit: Option<UnitHash>,
    pub bounced: bool,
    /// Human-readable outcome (bounce reason, or a summary of effects).
    pub response: String,
}

/// The immutable object a formula evaluation sees as `trigger.*` (§4.9).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub address: Address,
    pub initial_address: Address,
    pub unit: UnitHash,
    pub initial_unit: UnitHash,
    pub outputs: BTreeMap<String, Amount>,
    pub data: serde_json::Value,
}
