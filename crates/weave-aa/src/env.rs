//! [`weave_formula::Env`] backed by [`StateDb`]'s `kv_state` tree.

use std::sync::Arc;

use weave_core::aa::AaValue;
use weave_core::ids::{Address, Amount, Asset};
use weave_formula::Env;
use weave_state::StateDb;

fn asset_id(asset: &Asset) -> Option<weave_core::ids::AssetId> {
    match asset {
        Asset::Base => None,
        Asset::Issued(id) => Some(*id),
    }
}

/// Read-through environment for one trigger evaluation. `now` is fixed to
/// the triggering unit's timestamp, never the wall clock (§4.9).
pub struct DbEnv {
    db: Arc<StateDb>,
    now: i64,
}

impl DbEnv {
    pub fn new(db: Arc<StateDb>, now: i64) -> Self {
        Self { db, now }
    }
}

impl Env for DbEnv {
    fn state_var(&self, address: &Address, name: &str) -> Option<AaValue> {
        self.db.get_state_var(address, name).ok().flatten()
    }

    fn balance(&self, address: &Address, asset: &Asset) -> Amount {
        self.db.get_balance(address, asset).unwrap_or(0)
    }

    fn data_feed(&self, oracles: &[Address], feed_name: &str) -> Option<String> {
        self.db.data_feed(oracles, feed_name).ok().flatten()
    }

    fn attestation(&self, attestor: &Address, address: &Address, field: &str) -> Option<String> {
        self.db.attestation(attestor, address, field).ok().flatten()
    }

    fn asset_field(&self, asset: &Asset, field: &str) -> Option<String> {
        let id = asset_id(asset)?;
        self.db.asset_field(&id, field).ok().flatten()
    }

    fn reference_timestamp(&self) -> i64 {
        self.now
    }
}
