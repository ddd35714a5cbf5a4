//! `prepare_witness_proof`/`prepare_catchup_chain` (§4.10 points on witness
//! proofs and catchup): the read-only queries a peer runs against its own
//! `StateDb` to answer a new node's bootstrap request.
//!
//! **Simplification**: the exact "already current" boundary compares the
//! requester's `last_stable_mci` against the *last-ball mci of the newest
//! unstable main-chain unit* (one hop through that unit's `last_ball_unit`).
//! This implementation compares directly against the newest unstable unit's
//! own `main_chain_index` instead, skipping that extra indirection — one
//! main-chain step earlier than the exact boundary, never later, so
//! a requester is never told "already current" when it is not. Also, since
//! this protocol's witness list is fixed at genesis (no witness-change
//! operation is specified anywhere else in this codebase), no
//! witness-change/definition joints are ever appended to the proof — there
//! is nothing for them to prove.

use weave_core::ids::MainChainIndex;
use weave_core::unit::{Ball, Unit};
use weave_core::WeaveError;
use weave_state::StateDb;

pub struct WitnessProof {
    pub already_current: bool,
    pub unstable_mc_joints: Vec<Unit>,
}

pub fn prepare_witness_proof(db: &StateDb, requester_last_stable_mci: MainChainIndex) -> Result<WitnessProof, WeaveError> {
    let candidates = db.main_chain_units_since(requester_last_stable_mci)?;
    let newest_unstable_mci = candidates
        .iter()
        .filter(|p| !p.is_stable)
        .filter_map(|p| p.main_chain_index)
        .max();

    let already_current = match newest_unstable_mci {
        None => true,
        Some(newest) => requester_last_stable_mci > newest,
    };
    if already_current {
        return Ok(WitnessProof { already_current: true, unstable_mc_joints: Vec::new() });
    }

    let mut joints = Vec::with_capacity(candidates.len());
    for props in &candidates {
        if let Some(unit) = db.get_unit(&props.unit_hash)? {
            joints.push(unit);
        }
    }
    Ok(WitnessProof { already_current: false, unstable_mc_joints: joints })
}

/// Balls for every stable main-chain unit in `(from_mci, to_mci]`, in
/// ascending mci order. A stable main-chain unit with no recorded ball is a
/// server-side inconsistency (§4.10: "never a raised exception") — logged
/// and skipped rather than failing the whole response.
pub fn prepare_catchup_chain(db: &StateDb, from_mci: MainChainIndex, to_mci: MainChainIndex) -> Result<Vec<Ball>, WeaveError> {
    let mut balls = Vec::new();
    for props in db.main_chain_units_since(from_mci)? {
        let Some(mci) = props.main_chain_index else { continue };
        if mci > to_mci || !props.is_stable {
            continue;
        }
        match db.ball_for_unit(&props.unit_hash)? {
            Some(ball_hash) => match db.get_ball(&ball_hash)? {
                Some(ball) => balls.push(ball),
                None => tracing::error!(unit = %props.unit_hash, "ball row missing for recorded ball hash"),
            },
            None => tracing::error!(unit = %props.unit_hash, mci, "stable main-chain unit has no ball"),
        }
    }
    Ok(balls)
}
