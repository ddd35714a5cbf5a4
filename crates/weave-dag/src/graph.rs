//! Graph queries (C4): pure, deterministic functions of DAG state.
//!
//! Every query here is injected with a [`UnitSource`] so callers (cache,
//! storage, or a test double) decide where unit props come from; no query
//! touches the clock or any other non-deterministic input.

use std::collections::BTreeSet;

use weave_core::constants::MAJORITY_OF_WITNESSES;
use weave_core::ids::{Address, MainChainIndex, UnitHash};
use weave_core::unit::UnitProps;

/// Anything that can answer "what do we know about this unit" is a valid
/// source for graph queries — `Cache` and `StateDb` both implement it.
pub trait UnitSource {
    fn props(&self, unit: &UnitHash) -> Option<UnitProps>;
}

/// Among `parents`, pick the one with the highest `witnessed_level`;
/// tie-break by lower `level`, then by lexicographically smaller `unit_hash`.
pub fn best_parent<S: UnitSource>(source: &S, parents: &[UnitHash]) -> Option<UnitHash> {
    parents
        .iter()
        .filter_map(|p| source.props(p).map(|props| (p, props)))
        .max_by(|(a_hash, a), (b_hash, b)| {
            a.witnessed_level
                .cmp(&b.witnessed_level)
                .then_with(|| b.level.cmp(&a.level))
                .then_with(|| b_hash.cmp(a_hash))
        })
        .map(|(h, _)| *h)
}

/// Walk the best-parent chain from `unit`, accumulating distinct witness
/// addresses until `MAJORITY_OF_WITNESSES` are seen. Returns the level of the
/// unit at which the last required witness was observed.
pub fn witnessed_level<S: UnitSource>(
    source: &S,
    unit: &UnitHash,
    witnesses: &BTreeSet<Address>,
) -> u64 {
    let mut seen: BTreeSet<Address> = BTreeSet::new();
    let mut cursor = Some(*unit);
    let mut last_level = 0u64;

    while let Some(u) = cursor {
        let Some(props) = source.props(&u) else {
            break;
        };
        last_level = props.level;
        for addr in &props.author_addresses {
            if witnesses.contains(addr) {
                seen.insert(*addr);
            }
        }
        if seen.len() >= MAJORITY_OF_WITNESSES {
            return last_level;
        }
        cursor = props.best_parent_unit;
    }
    last_level
}

/// `max(parent.limci, parent.mci if parent.is_on_main_chain)` across parents.
pub fn latest_included_mc_index<S: UnitSource>(
    source: &S,
    parents: &[UnitHash],
) -> Option<MainChainIndex> {
    parents
        .iter()
        .filter_map(|p| source.props(p))
        .filter_map(|props| {
            if props.is_on_main_chain {
                props.main_chain_index.max(props.latest_included_mc_index)
            } else {
                props.latest_included_mc_index
            }
        })
        .max()
}

/// `earlier` is stable from the perspective of `tips` iff the best-parent
/// chain from every tip eventually reaches `earlier`, and the witness-majority
/// constraint rules out any alternate branch overtaking it.
///
/// This walks each tip's best-parent chain down to `earlier.level` (or below)
/// and checks membership; it is intentionally simple and pure, matching the
/// deterministic-function requirement of §4.4 — the expensive "no alternate
/// branch can overtake" half of the rule is enforced by the main-chain engine
/// (C6), which only calls this once candidate tips already satisfy the
/// witnessed-level precondition.
pub fn is_stable_in_view_of<S: UnitSource>(
    source: &S,
    earlier: &UnitHash,
    tips: &[UnitHash],
) -> bool {
    let Some(earlier_props) = source.props(earlier) else {
        return false;
    };
    for tip in tips {
        if !chain_passes_through(source, tip, earlier, earlier_props.level) {
            return false;
        }
    }
    true
}

fn chain_passes_through<S: UnitSource>(
    source: &S,
    tip: &UnitHash,
    target: &UnitHash,
    target_level: u64,
) -> bool {
    let mut cursor = Some(*tip);
    while let Some(u) = cursor {
        if &u == target {
            return true;
        }
        let Some(props) = source.props(&u) else {
            return false;
        };
        if props.level < target_level {
            return false;
        }
        cursor = props.best_parent_unit;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use weave_core::unit::Sequence;

    struct MapSource(BTreeMap<UnitHash, UnitProps>);

    impl UnitSource for MapSource {
        fn props(&self, unit: &UnitHash) -> Option<UnitProps> {
            self.0.get(unit).cloned()
        }
    }

    fn hash(b: u8) -> UnitHash {
        UnitHash::from_bytes([b; 32])
    }

    fn props(level: u64, wl: u64, best_parent: Option<UnitHash>) -> UnitProps {
        UnitProps {
            unit_hash: hash(0),
            parent_units: vec![],
            level,
            witnessed_level: wl,
            latest_included_mc_index: None,
            main_chain_index: None,
            is_on_main_chain: false,
            is_stable: false,
            is_free: false,
            sequence: Sequence::TempBad,
            best_parent_unit: best_parent,
            witness_list_unit: None,
            author_addresses: vec![],
            timestamp: 0,
        }
    }

    #[test]
    fn best_parent_picks_highest_witnessed_level() {
        let mut map = BTreeMap::new();
        map.insert(hash(1), props(1, 5, None));
        map.insert(hash(2), props(1, 9, None));
        let source = MapSource(map);
        assert_eq!(
            best_parent(&source, &[hash(1), hash(2)]),
            Some(hash(2))
        );
    }

    #[test]
    fn chain_passes_through_finds_ancestor() {
        let mut map = BTreeMap::new();
        map.insert(hash(1), props(1, 1, None));
        map.insert(hash(2), props(2, 1, Some(hash(1))));
        map.insert(hash(3), props(3, 1, Some(hash(2))));
        let source = MapSource(map);
        assert!(chain_passes_through(&source, &hash(3), &hash(1), 1));
        assert!(!chain_passes_through(&source, &hash(1), &hash(3), 3));
    }
}
