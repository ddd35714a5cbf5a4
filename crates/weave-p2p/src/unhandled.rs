//! `unhandled_joints`/`dependencies` bookkeeping for §4.10 point 2/4: a
//! joint with missing parents is held here instead of validated, and
//! re-queued once every parent it was waiting on is known good. Kept as
//! in-memory session state of the P2P layer rather than a `StateDb` tree —
//! these are joints the node has explicitly not yet accepted, so there is
//! nothing here the dual-store atomicity discipline (§4.2/§4.7) needs to
//! protect; a restart is free to ask peers for them again.

use std::collections::{HashMap, HashSet};

use weave_core::ids::UnitHash;
use weave_core::unit::Unit;

#[derive(Default)]
pub struct UnhandledJoints {
    waiting: HashMap<UnitHash, Unit>,
    /// missing parent -> units blocked on it arriving.
    dependents: HashMap<UnitHash, HashSet<UnitHash>>,
}

impl UnhandledJoints {
    /// Record `unit` as blocked on `missing_parents`. `unit.unit_hash` must
    /// already be set.
    pub fn queue(&mut self, unit: Unit, missing_parents: &[UnitHash]) {
        let hash = unit.unit_hash.expect("unit hashed before queuing");
        for parent in missing_parents {
            self.dependents.entry(*parent).or_default().insert(hash);
        }
        self.waiting.insert(hash, unit);
    }

    /// Call once `saved` is accepted (known-good). Returns every queued
    /// joint that now has all its parents available, removing them from the
    /// wait set; joints still missing other parents stay queued.
    pub fn on_saved(&mut self, saved: UnitHash, has_unit: impl Fn(&UnitHash) -> bool) -> Vec<Unit> {
        let Some(children) = self.dependents.remove(&saved) else { return Vec::new() };
        let mut ready = Vec::new();
        for child in children {
            let Some(unit) = self.waiting.get(&child) else { continue };
            if unit.parent_units.iter().all(|p| has_unit(p)) {
                ready.push(self.waiting.remove(&child).expect("just checked present"));
            }
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::unit::Sequence;

    fn unit(hash: u8, parents: &[u8]) -> Unit {
        Unit {
            unit_hash: Some(UnitHash::from_bytes([hash; 32])),
            version: "1.0".into(),
            alt_chain_id: String::new(),
            parent_units: parents.iter().map(|p| UnitHash::from_bytes([*p; 32])).collect(),
            last_ball: None,
            last_ball_unit: None,
            witness_list_unit: None,
            headers_commission: 0,
            payload_commission: 0,
            authors: vec![],
            messages: vec![],
            timestamp: 0,
            main_chain_index: None,
            level: 0,
            latest_included_mc_index: None,
            is_on_main_chain: false,
            is_stable: false,
            is_free: true,
            sequence: Sequence::Good,
        }
    }

    #[test]
    fn child_is_released_once_parent_arrives() {
        let mut table = UnhandledJoints::default();
        let parent = UnitHash::from_bytes([1; 32]);
        table.queue(unit(2, &[1]), &[parent]);
        assert_eq!(table.len(), 1);

        let ready = table.on_saved(parent, |_| false);
        assert_eq!(ready.len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn child_stays_queued_if_another_parent_still_missing() {
        let mut table = UnhandledJoints::default();
        let p1 = UnitHash::from_bytes([1; 32]);
        let p2 = UnitHash::from_bytes([2; 32]);
        table.queue(unit(3, &[1, 2]), &[p1, p2]);

        let ready = table.on_saved(p1, |h| *h == p1);
        assert!(ready.is_empty());
        assert_eq!(table.len(), 1);
    }
}
