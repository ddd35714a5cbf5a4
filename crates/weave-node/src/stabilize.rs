//! Advances the main chain as far as current tips allow, persists whatever
//! stabilizes, and hands the caller everything it needs to run the AA
//! composer afterward (§4.6, §4.9, §13's "composer runs outside the write
//! lock" rule). Kept as its own small module since `main.rs`'s loop calls it
//! from two places (after saving a freshly-validated joint, and on the
//! periodic stabilization tick for joints whose stabilization only becomes
//! possible once a sibling's tip advances).

use std::sync::Arc;

use tracing::{debug, info};

use weave_core::ids::{BallHash, UnitHash};
use weave_core::unit::{Sequence, Unit, UnitProps};
use weave_core::WeaveError;
use weave_dag::UnitSource;
use weave_mainchain::{BallLookup, MainChainEngine, UnitLookup};
use weave_mutex::ResourceGovernor;
use weave_state::{Cache, StateDb, StateEngine};
use weave_validator::{extract_aa_definition, extract_aa_triggers};

/// Bridges `Cache` (in-memory unstable props) and `StateDb` (full unit
/// bodies, committed balls) into the three traits `MainChainEngine::advance`
/// needs from one object.
struct NodeSource<'a> {
    cache: &'a Cache,
    db: &'a StateDb,
}

impl UnitSource for NodeSource<'_> {
    fn props(&self, unit: &UnitHash) -> Option<UnitProps> {
        self.cache.props(unit)
    }
}

impl UnitLookup for NodeSource<'_> {
    fn unit(&self, hash: &UnitHash) -> Option<Unit> {
        self.db.get_unit(hash).ok().flatten()
    }
}

impl BallLookup for NodeSource<'_> {
    fn ball_for_unit(&self, unit: &UnitHash) -> Option<BallHash> {
        self.db.ball_for_unit(unit).ok().flatten()
    }
}

/// Tracks the one piece of state the stabilization step needs across calls
/// that isn't already recoverable from `StateDb`/`Cache`: the hash of the
/// main-chain unit at `last_stable_mci`, which `MainChainEngine::advance`
/// walks backward from.
pub struct Stabilizer {
    main_chain: MainChainEngine,
    last_stable_mci: u64,
    last_stable_unit: UnitHash,
}

impl Stabilizer {
    pub fn new(main_chain: MainChainEngine, last_stable_mci: u64, last_stable_unit: UnitHash) -> Self {
        Self { main_chain, last_stable_mci, last_stable_unit }
    }

    /// Advance the main chain as far as the node's current free units allow,
    /// persisting any newly-stable units under the write lock, then return
    /// to the caller so it can run `Composer::run_due_triggers` without
    /// holding that lock.
    pub async fn advance(
        &mut self,
        db: &Arc<StateDb>,
        cache: &Arc<Cache>,
        engine: &Arc<StateEngine>,
        governor: &Arc<ResourceGovernor>,
    ) -> Result<usize, WeaveError> {
        let tips = db.get_free_units()?;
        if tips.is_empty() {
            return Ok(0);
        }

        let source = NodeSource { cache, db };
        let result =
            self.main_chain.advance(&source, &tips, self.last_stable_mci, self.last_stable_unit);
        if result.stabilized.is_empty() {
            return Ok(0);
        }

        let mut aa_definitions = Vec::new();
        let mut triggers = Vec::new();
        let mut newly_stable = Vec::with_capacity(result.stabilized.len());

        for stabilized in &result.stabilized {
            if stabilized.sequence == Sequence::Good {
                if let Some(unit) = db.get_unit(&stabilized.props.unit_hash)? {
                    let mci = stabilized.props.main_chain_index.expect("stabilized unit has an mci");
                    if let Some(def) = extract_aa_definition(&unit, mci, stabilized.props.unit_hash) {
                        aa_definitions.push(def);
                    }
                    triggers.extend(extract_aa_triggers(db, &unit, mci, stabilized.props.unit_hash));
                }
            }
            if stabilized.props.is_on_main_chain {
                self.last_stable_unit = stabilized.props.unit_hash;
            }
            newly_stable.push((stabilized.props.clone(), stabilized.ball.clone()));
        }

        let count = newly_stable.len();
        {
            let _write = governor.acquire_write().await;
            engine.commit_stabilization(result.new_last_stable_mci, newly_stable, aa_definitions, triggers)?;
        }
        for stabilized in &result.stabilized {
            cache.promote_to_stable(stabilized.props.clone());
        }
        self.last_stable_mci = result.new_last_stable_mci;

        info!(mci = self.last_stable_mci, count, "units stabilized");
        debug!(unstable = cache.len_unstable(), "cache size after stabilization");
        Ok(count)
    }
}
