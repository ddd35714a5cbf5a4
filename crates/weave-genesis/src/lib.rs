//! Builds the single genesis unit and writes it directly into a `StateDb`
//! (§13), bypassing `weave-validator`/`weave-mainchain` entirely since there
//! is no prior state to validate against. The genesis unit is parentless,
//! pre-marked stable and on the main chain at `main_chain_index = 0`, and
//! carries one `Issue`-kind payment input that mints the entire initial
//! supply to a single configured address.

pub mod params;

pub use params::GenesisParams;

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use weave_core::constants::{GENESIS_TIMESTAMP, TOTAL_SUPPLY_BYTES};
use weave_core::ids::Asset;
use weave_core::unit::{
    AppKind, Author, Ball, Input, InputKind, Message, Output, PayloadLocation, Sequence, Unit,
    UnitProps,
};
use weave_core::WeaveError;
use weave_state::{StateDb, StateEngine};

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("genesis already applied")]
    AlreadyApplied,
    #[error(transparent)]
    Hashing(#[from] weave_crypto::canonical::CanonicalError),
    #[error(transparent)]
    Storage(#[from] WeaveError),
}

/// Apply genesis to a freshly opened `StateDb`. Refuses outright rather than
/// silently minting a second supply if a genesis unit is already recorded;
/// callers still ought to check `StateDb::genesis_unit()` themselves before
/// reaching for this, since building the unit is otherwise wasted work.
pub fn apply_genesis(
    db: Arc<StateDb>,
    params: &GenesisParams,
) -> Result<weave_core::ids::UnitHash, GenesisError> {
    if db.genesis_unit()?.is_some() {
        return Err(GenesisError::AlreadyApplied);
    }

    let output = Output {
        address: params.supply_recipient,
        amount: TOTAL_SUPPLY_BYTES,
        asset: Asset::Base,
        blinding: None,
        is_spent: false,
        denomination: None,
    };
    let input = Input {
        kind: InputKind::Issue,
        src_unit: None,
        src_message_index: None,
        src_output_index: None,
        serial_number: None,
        amount: Some(TOTAL_SUPPLY_BYTES),
        asset: Asset::Base,
        address: params.supply_recipient,
    };
    let message = Message {
        app: AppKind::Payment,
        payload_location: PayloadLocation::None,
        payload_hash: [0u8; 32],
        payload: None,
        inputs: vec![input],
        outputs: vec![output],
    };
    let author = Author {
        address: params.supply_recipient,
        definition: Some(params.supply_recipient_definition.clone()),
        authentifiers: BTreeMap::new(),
    };

    let mut unit = Unit {
        unit_hash: None,
        version: "1.0".into(),
        alt_chain_id: String::new(),
        parent_units: Vec::new(),
        last_ball: None,
        last_ball_unit: None,
        witness_list_unit: None,
        headers_commission: 0,
        payload_commission: 0,
        authors: vec![author],
        messages: vec![message],
        timestamp: GENESIS_TIMESTAMP,
        main_chain_index: Some(0),
        level: 0,
        latest_included_mc_index: None,
        is_on_main_chain: true,
        is_stable: true,
        is_free: true,
        sequence: Sequence::Good,
    };
    let unit_hash = weave_crypto::canonical::unit_hash(&unit)?;
    unit.unit_hash = Some(unit_hash);

    let props = UnitProps {
        unit_hash,
        parent_units: Vec::new(),
        level: 0,
        witnessed_level: 0,
        latest_included_mc_index: None,
        main_chain_index: Some(0),
        is_on_main_chain: true,
        is_stable: true,
        is_free: true,
        sequence: Sequence::Good,
        best_parent_unit: None,
        witness_list_unit: None,
        author_addresses: vec![params.supply_recipient],
        timestamp: GENESIS_TIMESTAMP,
    };

    let ball_hash = weave_crypto::canonical::ball_hash(&unit_hash, &[], &[], false);
    let ball = Ball {
        ball_hash,
        unit: unit_hash,
        parent_balls: Vec::new(),
        skiplist_balls: Vec::new(),
        is_nonserial: false,
    };

    let engine = StateEngine::new(db);
    engine.commit_genesis(unit, props, ball, params.witnesses.clone())?;

    tracing::info!(unit = %unit_hash, amount = TOTAL_SUPPLY_BYTES, "applied genesis");
    Ok(unit_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_crypto::keypair::KeyPair;

    fn test_params() -> GenesisParams {
        let key = KeyPair::generate();
        let witnesses = (0..weave_core::constants::WITNESS_COUNT)
            .map(|_| KeyPair::generate().address)
            .collect();
        GenesisParams {
            witnesses,
            supply_recipient: key.address,
            supply_recipient_definition: key.definition(),
        }
    }

    #[test]
    fn applies_once_and_mints_full_supply() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(StateDb::open(dir.path()).unwrap());
        let params = test_params();

        let unit_hash = apply_genesis(db.clone(), &params).unwrap();
        assert_eq!(db.genesis_unit().unwrap(), Some(unit_hash));
        assert_eq!(db.last_stable_mci().unwrap(), Some(0));
        assert_eq!(db.witness_list().unwrap(), Some(params.witnesses.clone()));

        let unit = db.get_unit(&unit_hash).unwrap().expect("genesis unit stored");
        assert!(unit.is_stable);
        assert!(unit.is_on_main_chain);
        assert_eq!(unit.messages[0].outputs[0].amount, TOTAL_SUPPLY_BYTES);

        assert!(matches!(apply_genesis(db, &params), Err(GenesisError::AlreadyApplied)));
    }
}
