//! The writer (C7): the sole path by which validated units, stabilization
//! results and AA responses reach disk.
//!
//! Every public method here stages a [`StagedMutations`] batch and commits it
//! through one sled transaction over the relational trees, then — only if
//! that transaction committed — applies the accompanying kv-state batch and
//! clears its journal row (§4.2, §4.7). Callers are expected to already hold
//! the `write` lock from `weave_mutex::ResourceGovernor` for the duration of
//! a call; this module does not acquire it itself.

use std::sync::Arc;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use tracing::info;

use weave_core::aa::{AaDefinition, AaResponse, AaTrigger};
use weave_core::ids::{Address, Amount, Asset, MainChainIndex, UnitHash};
use weave_core::unit::{Ball, Unit, UnitProps};
use weave_core::WeaveError;
use weave_formula::eval::StateWrite as FormulaStateWrite;

use crate::db::{
    balance_key_pub, postings_in_unit, spent_output_key_pub, state_var_key_pub, trigger_key_pub, KvBatch, StateDb,
};

/// One spent-output assertion: `(src_unit, src_message_index, src_output_index, spender)`.
pub type SpendAssertion = (UnitHash, u32, u32, UnitHash);

/// All state changes staged by one writer call before atomic commit.
#[derive(Default)]
struct StagedMutations {
    units: Vec<Unit>,
    props: Vec<UnitProps>,
    balls: Vec<(Ball, UnitHash)>,
    new_free_units: Vec<UnitHash>,
    retired_free_units: Vec<UnitHash>,
    spends: Vec<SpendAssertion>,
    author_definitions: Vec<(Address, serde_json::Value)>,
    aa_definitions: Vec<AaDefinition>,
    new_triggers: Vec<AaTrigger>,
    consumed_triggers: Vec<AaTrigger>,
    aa_responses: Vec<AaResponse>,
    kv_writes: Vec<(Vec<u8>, Vec<u8>)>,
    meta: Vec<(&'static str, Vec<u8>)>,
}

pub struct StateEngine {
    pub db: Arc<StateDb>,
}

impl StateEngine {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self { db }
    }

    /// Persist a unit that the validator (C5) has already accepted, along
    /// with the graph properties (C4) computed for it.
    ///
    /// Stages: the unit and its props, the new free-unit entry, retirement of
    /// any parent that is no longer free, and the spend assertions made by
    /// its payment messages. Plain address definitions an author publishes
    /// are staged here too; AA definitions are not — an AA's `mci` is only
    /// known at stabilization, so those are staged by
    /// [`StateEngine::commit_stabilization`] instead.
    pub fn save_joint(
        &self,
        unit: Unit,
        props: UnitProps,
        spends: Vec<SpendAssertion>,
    ) -> Result<(), WeaveError> {
        let mut staged = StagedMutations {
            retired_free_units: unit.parent_units.clone(),
            new_free_units: vec![props.unit_hash],
            spends,
            ..Default::default()
        };
        for author in &unit.authors {
            if let Some(def) = &author.definition {
                staged.author_definitions.push((author.address, def.clone()));
            }
        }
        staged.units.push(unit);
        staged.props.push(props);
        self.commit(staged)
    }

    /// Mark a batch of units stable as of `mci`, insert their balls, register
    /// any AA definitions they publish, and enqueue any AA triggers they
    /// create (C6 stabilization transaction, §4.6). `newly_stable` pairs each
    /// stabilized unit's updated props with the ball built for it.
    pub fn commit_stabilization(
        &self,
        mci: MainChainIndex,
        newly_stable: Vec<(UnitProps, Ball)>,
        aa_definitions: Vec<AaDefinition>,
        triggers: Vec<AaTrigger>,
    ) -> Result<(), WeaveError> {
        let mut staged = StagedMutations::default();
        let mut stabilized = Vec::with_capacity(newly_stable.len());
        for (props, ball) in newly_stable {
            stabilized.push((props.unit_hash, props.level));
            staged.balls.push((ball, props.unit_hash));
            staged.props.push(props);
        }
        staged.aa_definitions = aa_definitions;
        staged.new_triggers = triggers;
        staged.meta.push(("last_stable_mci", mci.to_be_bytes().to_vec()));
        self.commit(staged)?;

        // Data feed/attestation/asset-field indexing reads the units just
        // written above; done after commit so it only ever reflects units
        // that are actually stable (§4.8).
        for (unit_hash, level) in stabilized {
            if let Some(unit) = self.db.get_unit(&unit_hash)? {
                for posting in postings_in_unit(&unit, unit_hash) {
                    self.db.index_posting(posting, mci, level, unit_hash)?;
                }
            }
        }
        Ok(())
    }

    /// Apply one top-level composed AA trigger's effects, plus those of any
    /// nested triggers it caused: state var writes, balance deltas already
    /// resolved to absolute amounts by the caller, the response units the
    /// triggered AAs posted (I9/P6 — each with its causing unit retired from
    /// `free_units` and itself added as the new free tip), and the response
    /// records for the trigger itself and every nested trigger composed
    /// underneath it. `state_writes` come straight from a formula
    /// [`weave_formula::EvalContext`]; bounced triggers never reach this
    /// call (nothing here is conditional on bounce). Committed as one
    /// transaction so a top-level trigger, the response units it caused, and
    /// the trigger row's removal all land on disk together (§4.9 point 7).
    pub fn commit_aa_response(
        &self,
        trigger: AaTrigger,
        state_writes: Vec<FormulaStateWrite>,
        balance_writes: Vec<(Address, Asset, Amount)>,
        response_units: Vec<(Unit, UnitProps)>,
        responses: Vec<AaResponse>,
    ) -> Result<(), WeaveError> {
        let mut staged = StagedMutations::default();
        for w in state_writes {
            let key = state_var_key_pub(&w.address, &w.name);
            let value = match w.value.to_aa_value() {
                Some(v) => v,
                None => continue, // `delete` — represented as Unset, drop the key instead
            };
            staged.kv_writes.push((key, bincode::serialize(&value)?));
        }
        for (address, asset, amount) in balance_writes {
            let key = balance_key_pub(&address, &asset);
            staged.kv_writes.push((key, amount.to_le_bytes().to_vec()));
        }
        for (unit, props) in response_units {
            staged.retired_free_units.extend(unit.parent_units.iter().copied());
            staged.new_free_units.push(props.unit_hash);
            staged.units.push(unit);
            staged.props.push(props);
        }
        staged.consumed_triggers.push(trigger);
        staged.aa_responses = responses;
        self.commit(staged)
    }

    /// Write the single genesis unit, its ball, and the fixed witness list
    /// directly to disk, bypassing the validator/main-chain pipeline
    /// entirely (§13) — the one unit every node must agree on byte-for-byte
    /// without having run any consensus over it. Callers (`weave-genesis`)
    /// are responsible for refusing to call this twice.
    pub fn commit_genesis(
        &self,
        unit: Unit,
        props: UnitProps,
        ball: Ball,
        witnesses: Vec<Address>,
    ) -> Result<(), WeaveError> {
        let unit_hash = props.unit_hash;
        let mut staged = StagedMutations { new_free_units: vec![unit_hash], ..Default::default() };
        for author in &unit.authors {
            if let Some(def) = &author.definition {
                staged.author_definitions.push((author.address, def.clone()));
            }
        }
        staged.units.push(unit);
        staged.props.push(props);
        staged.balls.push((ball, unit_hash));
        staged.meta.push(("last_stable_mci", 0u64.to_be_bytes().to_vec()));
        staged.meta.push(("genesis_unit", unit_hash.to_hex().into_bytes()));
        staged.meta.push(("witness_list", bincode::serialize(&witnesses)?));
        self.commit(staged)
    }

    fn commit(&self, staged: StagedMutations) -> Result<(), WeaveError> {
        for u in &staged.units {
            if u.unit_hash.is_none() {
                return Err(WeaveError::Bug("save_joint called with an unhashed unit".into()));
            }
        }
        let journal_id = next_journal_id();
        let kv_batch = KvBatch { writes: staged.kv_writes.clone() };
        let needs_kv = !kv_batch.writes.is_empty();

        let trees = self.db.relational_trees();
        let result: Result<(), TransactionError<WeaveError>> =
            trees.transaction(|(units, props, balls, unit_to_ball, free_units, spent, journal)| {
                for u in &staged.units {
                    let hash = u.unit_hash.expect("unit must be hashed before save_joint");
                    let bytes = bincode::serialize(u)
                        .map_err(|e| ConflictableTransactionError::Abort(WeaveError::from(e)))?;
                    units.insert(hash.as_bytes().as_slice(), bytes)?;
                }
                for p in &staged.props {
                    let bytes = bincode::serialize(p)
                        .map_err(|e| ConflictableTransactionError::Abort(WeaveError::from(e)))?;
                    props.insert(p.unit_hash.as_bytes().as_slice(), bytes)?;
                }
                for (ball, unit) in &staged.balls {
                    let bytes = bincode::serialize(ball)
                        .map_err(|e| ConflictableTransactionError::Abort(WeaveError::from(e)))?;
                    balls.insert(ball.ball_hash.as_bytes().as_slice(), bytes)?;
                    unit_to_ball.insert(unit.as_bytes().as_slice(), ball.ball_hash.as_bytes().as_slice())?;
                }
                for h in &staged.new_free_units {
                    free_units.insert(h.as_bytes().as_slice(), &[])?;
                }
                for h in &staged.retired_free_units {
                    free_units.remove(h.as_bytes().as_slice())?;
                }
                for (src_unit, msg, out, spender) in &staged.spends {
                    let key = spent_output_key_pub(src_unit, *msg, *out);
                    spent.insert(key, spender.as_bytes().as_slice())?;
                }
                if needs_kv {
                    let bytes = bincode::serialize(&kv_batch)
                        .map_err(|e| ConflictableTransactionError::Abort(WeaveError::from(e)))?;
                    journal.insert(journal_id.to_be_bytes().as_slice(), bytes)?;
                }
                Ok(())
            });

        result.map_err(|e| match e {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => WeaveError::from(err),
        })?;

        // Auxiliary trees outside the relational join (see `relational_trees` doc).
        for (address, def) in &staged.author_definitions {
            let bytes = bincode::serialize(def)?;
            self.db.definitions_tree().insert(address.as_bytes(), bytes)?;
        }
        for def in &staged.aa_definitions {
            let bytes = bincode::serialize(def)?;
            self.db.aa_definitions_tree().insert(def.address.as_bytes(), bytes)?;
        }
        for t in &staged.new_triggers {
            let key = trigger_key_pub(t.mci, &t.unit, &t.address);
            self.db.aa_triggers_tree().insert(key, bincode::serialize(t)?)?;
        }
        for t in &staged.consumed_triggers {
            let key = trigger_key_pub(t.mci, &t.unit, &t.address);
            self.db.aa_triggers_tree().remove(key)?;
        }
        for r in &staged.aa_responses {
            let key = trigger_key_pub(r.mci, &r.trigger_unit, &r.aa_address);
            self.db.aa_responses_tree().insert(key, bincode::serialize(r)?)?;
        }
        for (k, v) in &staged.meta {
            self.db.meta_tree().insert(k.as_bytes(), v.as_slice())?;
        }

        // The relational commit above is durable; only now do we touch
        // kv_state, and only now clear the journal row that describes it.
        // A crash between the two is recovered by `StateDb::open`'s replay.
        if needs_kv {
            let mut batch = sled::Batch::default();
            for (k, v) in &kv_batch.writes {
                batch.insert(k.as_slice(), v.as_slice());
            }
            self.db.kv_tree().apply_batch(batch)?;
            self.db.kv_tree().flush()?;
            self.db.relational_trees().6.remove(journal_id.to_be_bytes().as_slice())?;
        }

        info!(
            units = staged.units.len(),
            balls = staged.balls.len(),
            triggers = staged.new_triggers.len(),
            "committed writer batch"
        );
        Ok(())
    }
}

/// A monotonically-increasing journal key. Derived from a process-local
/// counter, not wall-clock time, so replay order never depends on the clock.
fn next_journal_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
