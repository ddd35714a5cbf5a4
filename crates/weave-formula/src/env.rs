use weave_core::aa::AaValue;
use weave_core::ids::{Address, Amount, Asset};

/// Read-through access to chain state the formula language can observe.
/// Implemented by the AA composer against the relational + key-value stores;
/// a test double can implement it directly over in-memory maps.
pub trait Env {
    fn state_var(&self, address: &Address, name: &str) -> Option<AaValue>;
    fn balance(&self, address: &Address, asset: &Asset) -> Amount;
    /// Returns the most recent value posted to `feed_name` by any of
    /// `oracles`, breaking ties among unstable candidates with identical
    /// `(latest_included_mc_index, level)` by `unit_hash` ascending (§4.8).
    fn data_feed(&self, oracles: &[Address], feed_name: &str) -> Option<String>;
    fn attestation(&self, attestor: &Address, address: &Address, field: &str) -> Option<String>;
    fn asset_field(&self, asset: &Asset, field: &str) -> Option<String>;
    /// The deterministic time basis for `now()` expressions: the triggering
    /// unit's own `timestamp` field, never the evaluating node's wall clock
    /// (§4.9 "any non-determinism ... wall-clock ... is forbidden").
    fn reference_timestamp(&self) -> i64;
}

