//! In-memory cache of unstable-DAG unit properties (C3, §4.3).
//!
//! Every unit between the last stable point and the current free units is
//! read far more often than it is written, so the cache holds them in memory
//! and only loads through to [`StateDb`] on a miss — stable units that have
//! aged out of `stable_units_recent` are the only ones expected to miss.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use weave_core::ids::UnitHash;
use weave_core::unit::UnitProps;
use weave_dag::UnitSource;

use crate::db::StateDb;

/// How many recently-stabilized units to keep warm after they drop out of
/// the unstable set, so a burst of validations just behind the stable point
/// doesn't immediately fall through to disk.
const STABLE_RECENT_CAPACITY: usize = 2_000;

pub struct Cache {
    db: Arc<StateDb>,
    unstable: RwLock<HashMap<UnitHash, UnitProps>>,
    stable_recent: RwLock<HashMap<UnitHash, UnitProps>>,
}

impl Cache {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self {
            db,
            unstable: RwLock::new(HashMap::new()),
            stable_recent: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert_unstable(&self, props: UnitProps) {
        self.unstable.write().unwrap().insert(props.unit_hash, props);
    }

    /// Move a unit from the unstable set into the recent-stable ring once
    /// the main-chain engine (C6) marks it stable.
    pub fn promote_to_stable(&self, props: UnitProps) {
        self.unstable.write().unwrap().remove(&props.unit_hash);
        let mut recent = self.stable_recent.write().unwrap();
        if recent.len() >= STABLE_RECENT_CAPACITY {
            // Capacity is a soft cap: evict an arbitrary entry rather than
            // tracking insertion order, since eviction only ever costs one
            // extra disk read on the next miss.
            if let Some(k) = recent.keys().next().copied() {
                recent.remove(&k);
            }
        }
        recent.insert(props.unit_hash, props);
    }

    pub fn len_unstable(&self) -> usize {
        self.unstable.read().unwrap().len()
    }
}

impl UnitSource for Cache {
    fn props(&self, unit: &UnitHash) -> Option<UnitProps> {
        if let Some(p) = self.unstable.read().unwrap().get(unit) {
            return Some(p.clone());
        }
        if let Some(p) = self.stable_recent.read().unwrap().get(unit) {
            return Some(p.clone());
        }
        match self.db.get_props(unit) {
            Ok(Some(p)) => {
                self.stable_recent.write().unwrap().insert(*unit, p.clone());
                Some(p)
            }
            _ => None,
        }
    }
}
