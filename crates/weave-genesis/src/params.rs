use serde::{Deserialize, Serialize};
use weave_core::ids::Address;

/// Inputs to [`crate::apply_genesis`]. The same values must be compiled into
/// every node on the network — genesis is not negotiated, it is agreed on by
/// shipping the same constants (§13).
#[derive(Serialize, Deserialize)]
pub struct GenesisParams {
    /// The fixed witness list every unit references by `witness_list_unit`
    /// until a later witness-list unit supersedes it. Exactly
    /// `weave_core::constants::WITNESS_COUNT` addresses.
    pub witnesses: Vec<Address>,
    /// Address receiving the entire initial supply.
    pub supply_recipient: Address,
    /// `supply_recipient`'s definition tree, published inline on the genesis
    /// unit's sole author so ordinary validation can find it afterwards via
    /// `StateDb::get_author_definition` without a chicken-and-egg lookup.
    pub supply_recipient_definition: serde_json::Value,
}
