//! The main-chain engine (C6): deterministic witness-majority stability,
//! replacing a historical implementation's BFT vote-counting finality
//! tracker (§4.6, REDESIGN FLAG 1).
//!
//! Stability here is a pure function of graph shape, not of messages
//! exchanged between nodes: a main-chain unit is stable once every current
//! free unit's best-parent chain is proven (via [`weave_dag::is_stable_in_view_of`])
//! to pass through it. No vote is cast, collected, or waited for.

use std::collections::{BTreeSet, HashMap, HashSet};

use weave_core::ids::{Address, BallHash, MainChainIndex, UnitHash};
use weave_core::unit::{Ball, Sequence, Unit, UnitProps};
use weave_dag::{best_parent, is_stable_in_view_of, witnessed_level, UnitSource};

/// Access to full unit bodies, needed only for double-spend resolution among
/// units that stabilize together (I5). Implemented by whatever wraps both the
/// cache and the state db for the caller (typically the node's stabilization
/// loop).
pub trait UnitLookup {
    fn unit(&self, hash: &UnitHash) -> Option<Unit>;
}

/// Access to balls already committed for earlier-stabilized units, needed to
/// build each new ball's `parent_balls` (§3).
pub trait BallLookup {
    fn ball_for_unit(&self, unit: &UnitHash) -> Option<BallHash>;
}

/// One newly-stable unit, with the sequence decision and ball built for it
/// (§4.6).
#[derive(Debug, Clone)]
pub struct StabilizedUnit {
    pub props: UnitProps,
    pub sequence: Sequence,
    pub ball: Ball,
}

#[derive(Debug, Clone, Default)]
pub struct StabilizationResult {
    /// In increasing `main_chain_index` order.
    pub stabilized: Vec<StabilizedUnit>,
    pub new_last_stable_mci: MainChainIndex,
}

pub struct MainChainEngine {
    witnesses: BTreeSet<Address>,
}

impl MainChainEngine {
    pub fn new(witnesses: BTreeSet<Address>) -> Self {
        Self { witnesses }
    }

    /// Advance the main chain as far as current `tips` allow.
    ///
    /// Walks the best-parent chain from the best-witnessed tip down to
    /// `last_stable_unit` (exclusive), assigning a candidate `mci` to each
    /// unit in order, and stops at the first one that is not yet stable in
    /// view of every tip. For each unit that does stabilize, gathers the
    /// rest of its "ball" — ancestors not already included by an earlier
    /// stable unit — and resolves any double-spend conflicts among them.
    pub fn advance<S: UnitSource + UnitLookup + BallLookup>(
        &self,
        source: &S,
        tips: &[UnitHash],
        last_stable_mci: MainChainIndex,
        last_stable_unit: UnitHash,
    ) -> StabilizationResult {
        let Some(best_tip) = self.pick_best_tip(source, tips) else {
            return StabilizationResult { stabilized: vec![], new_last_stable_mci: last_stable_mci };
        };

        let candidates = main_chain_segment(source, best_tip, last_stable_unit);
        let mut result = StabilizationResult { stabilized: vec![], new_last_stable_mci: last_stable_mci };
        let mut overlay_stable: HashSet<UnitHash> = HashSet::new();
        let mut overlay_balls: HashMap<UnitHash, BallHash> = HashMap::new();
        let mut mci = last_stable_mci;

        for candidate in candidates {
            if !is_stable_in_view_of(source, &candidate, tips) {
                break;
            }
            mci += 1;

            let ball_members = collect_ball_members(source, candidate, &overlay_stable);
            let resolved = resolve_sequence(source, &ball_members);

            for member in ball_members {
                let Some(mut props) = source.props(&member) else { continue };
                let is_main_chain_unit = member == candidate;
                props.main_chain_index = Some(mci);
                props.is_on_main_chain = is_main_chain_unit;
                props.is_stable = true;
                let sequence = resolved.get(&member).copied().unwrap_or(Sequence::Good);
                props.sequence = sequence;

                let mut parent_balls: Vec<BallHash> = props
                    .parent_units
                    .iter()
                    .filter_map(|p| overlay_balls.get(p).copied().or_else(|| source.ball_for_unit(p)))
                    .collect();
                parent_balls.sort();
                parent_balls.dedup();

                let ball = Ball {
                    ball_hash: weave_crypto::ball_hash(&member, &parent_balls, &[], sequence != Sequence::Good),
                    unit: member,
                    parent_balls,
                    skiplist_balls: Vec::new(),
                    is_nonserial: sequence != Sequence::Good,
                };
                overlay_balls.insert(member, ball.ball_hash);
                overlay_stable.insert(member);

                result.stabilized.push(StabilizedUnit { props, sequence, ball });
            }
        }

        result.new_last_stable_mci = mci;
        result
    }

    /// Witnessed level of `unit` under this engine's witness list — exposed
    /// for the validator (C5), which needs it before a unit's props are
    /// committed to decide `best_parent_unit`/`level` at validation time.
    pub fn witnessed_level<S: UnitSource>(&self, source: &S, unit: &UnitHash) -> u64 {
        witnessed_level(source, unit, &self.witnesses)
    }

    fn pick_best_tip<S: UnitSource>(&self, source: &S, tips: &[UnitHash]) -> Option<UnitHash> {
        if tips.len() == 1 {
            return tips.first().copied();
        }
        best_parent(source, tips)
    }
}

/// Units strictly between `stop_at` (exclusive) and `tip` (inclusive) along
/// the best-parent chain, ordered oldest-first.
fn main_chain_segment<S: UnitSource>(source: &S, tip: UnitHash, stop_at: UnitHash) -> Vec<UnitHash> {
    let mut chain = Vec::new();
    let mut cursor = Some(tip);
    while let Some(u) = cursor {
        if u == stop_at {
            break;
        }
        chain.push(u);
        cursor = source.props(&u).and_then(|p| p.best_parent_unit);
    }
    chain.reverse();
    chain
}

/// Ancestors of `mc_unit` (via every parent edge, not just best-parent) that
/// have not already been included by an earlier stable main-chain unit.
fn collect_ball_members<S: UnitSource>(
    source: &S,
    mc_unit: UnitHash,
    already_included: &HashSet<UnitHash>,
) -> Vec<UnitHash> {
    let mut visited = HashSet::new();
    let mut stack = vec![mc_unit];
    let mut out = Vec::new();
    while let Some(u) = stack.pop() {
        if !visited.insert(u) {
            continue;
        }
        if already_included.contains(&u) {
            continue;
        }
        let Some(props) = source.props(&u) else { continue };
        if props.is_stable {
            continue;
        }
        out.push(u);
        for p in &props.parent_units {
            stack.push(*p);
        }
    }
    out
}

/// Resolve double-spend conflicts among units in one ball (I5): if two units
/// reference the same `(src_unit, src_message_index, src_output_index)`, the
/// one whose author appears earlier on the best-parent chain wins and is
/// `Good`; the rest of that conflict group are `FinalBad`. Units touching no
/// conflicting input default to `Good`.
fn resolve_sequence<S: UnitSource + UnitLookup>(
    source: &S,
    members: &[UnitHash],
) -> std::collections::HashMap<UnitHash, Sequence> {
    use std::collections::HashMap;

    let mut by_spent_output: HashMap<(UnitHash, u32, u32), Vec<UnitHash>> = HashMap::new();
    let mut units: HashMap<UnitHash, Unit> = HashMap::new();

    for &m in members {
        if let Some(u) = source.unit(&m) {
            for msg in &u.messages {
                for input in &msg.inputs {
                    if let (Some(src_unit), Some(src_msg), Some(src_out)) =
                        (input.src_unit, input.src_message_index, input.src_output_index)
                    {
                        by_spent_output.entry((src_unit, src_msg, src_out)).or_default().push(m);
                    }
                }
            }
            units.insert(m, u);
        }
    }

    let mut sequence: HashMap<UnitHash, Sequence> = members.iter().map(|m| (*m, Sequence::Good)).collect();

    for (_, spenders) in by_spent_output {
        if spenders.len() <= 1 {
            continue;
        }
        // Earlier on the best-parent chain wins; best-parent chains are
        // walked from each spender toward genesis, so "earlier" is "lower
        // level"; ties break on the smaller unit hash (§4.6).
        let winner = spenders
            .iter()
            .min_by(|a, b| {
                let la = source.props(a).map(|p| p.level).unwrap_or(u64::MAX);
                let lb = source.props(b).map(|p| p.level).unwrap_or(u64::MAX);
                la.cmp(&lb).then_with(|| a.cmp(b))
            })
            .copied();
        for s in spenders {
            if Some(s) != winner {
                sequence.insert(s, Sequence::FinalBad);
            }
        }
    }

    sequence
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct MapSource(BTreeMap<UnitHash, UnitProps>, BTreeMap<UnitHash, Unit>);

    impl UnitSource for MapSource {
        fn props(&self, unit: &UnitHash) -> Option<UnitProps> {
            self.0.get(unit).cloned()
        }
    }
    impl UnitLookup for MapSource {
        fn unit(&self, unit: &UnitHash) -> Option<Unit> {
            self.1.get(unit).cloned()
        }
    }
    impl BallLookup for MapSource {
        fn ball_for_unit(&self, _unit: &UnitHash) -> Option<BallHash> {
            None
        }
    }

    fn hash(b: u8) -> UnitHash {
        UnitHash::from_bytes([b; 32])
    }

    fn props(level: u64, best_parent: Option<UnitHash>, stable: bool) -> UnitProps {
        UnitProps {
            unit_hash: hash(0),
            parent_units: best_parent.into_iter().collect(),
            level,
            witnessed_level: level,
            latest_included_mc_index: None,
            main_chain_index: None,
            is_on_main_chain: false,
            is_stable: stable,
            is_free: false,
            sequence: Sequence::TempBad,
            best_parent_unit: best_parent,
            witness_list_unit: None,
            author_addresses: vec![],
            timestamp: 0,
        }
    }

    #[test]
    fn advances_main_chain_while_tips_confirm_it() {
        let mut p = BTreeMap::new();
        p.insert(hash(1), props(1, None, true));
        p.insert(hash(2), props(2, Some(hash(1)), false));
        p.insert(hash(3), props(3, Some(hash(2)), false));
        let source = MapSource(p, BTreeMap::new());

        let engine = MainChainEngine::new(BTreeSet::new());
        let result = engine.advance(&source, &[hash(3)], 5, hash(1));

        assert_eq!(result.new_last_stable_mci, 7);
        assert_eq!(result.stabilized.len(), 2);
        assert_eq!(result.stabilized[0].props.main_chain_index, Some(6));
        assert_eq!(result.stabilized[1].props.main_chain_index, Some(7));
    }
}
