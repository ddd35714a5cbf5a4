//! Accumulates dependents waiting on the same in-flight `get_joint` request
//! rather than sending one request per waiter, and reissues against a
//! different peer when a request stalls (§4.10's `RESPONSE_TIMEOUT`
//! scenario). Built on the same `tokio::sync::mpsc` channel-per-concern
//! idiom `P2pHandle` uses elsewhere — generalized here from a
//! fire-and-forget channel to a table that remembers who is waiting.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use libp2p::PeerId;

use weave_core::constants::MAX_HANDLERS_PER_PENDING_REQUEST;
use weave_core::ids::UnitHash;

struct Entry {
    peer: PeerId,
    requested_at: Instant,
    /// Units that cannot validate until `unit` arrives. Capped at
    /// `MAX_HANDLERS_PER_PENDING_REQUEST`; additional waiters are dropped —
    /// they will be re-queued the next time their own parent check runs.
    waiters: Vec<UnitHash>,
}

/// Outcome of [`PendingRequestTable::register`].
pub enum Register {
    /// Another request for this unit is already outstanding; no network
    /// call needed, the waiter will be woken when it resolves.
    Accumulated,
    /// The waiter cap was already hit; caller should not register it.
    TableFull,
    /// Nothing was outstanding for this unit; caller must send `get_joint`.
    SendRequest,
}

#[derive(Default)]
pub struct PendingRequestTable {
    entries: HashMap<UnitHash, Entry>,
}

impl PendingRequestTable {
    pub fn register(&mut self, wanted: UnitHash, dependent: UnitHash, peer: PeerId) -> Register {
        match self.entries.get_mut(&wanted) {
            Some(entry) => {
                if entry.waiters.len() >= MAX_HANDLERS_PER_PENDING_REQUEST {
                    return Register::TableFull;
                }
                entry.waiters.push(dependent);
                Register::Accumulated
            }
            None => {
                self.entries.insert(wanted, Entry { peer, requested_at: Instant::now(), waiters: vec![dependent] });
                Register::SendRequest
            }
        }
    }

    /// Call once `wanted` is known (saved or confirmed absent); returns
    /// every unit that was blocked on it.
    pub fn resolve(&mut self, wanted: &UnitHash) -> Vec<UnitHash> {
        self.entries.remove(wanted).map(|e| e.waiters).unwrap_or_default()
    }

    /// Units whose request has been outstanding for at least `timeout`.
    /// `next_peer` picks a different peer to retry against; entries for
    /// which it returns `None` are left pending as-is.
    pub fn sweep_stalled(
        &mut self,
        timeout: Duration,
        mut next_peer: impl FnMut(&UnitHash) -> Option<PeerId>,
    ) -> Vec<(UnitHash, PeerId)> {
        let now = Instant::now();
        let mut reissue = Vec::new();
        for (unit, entry) in self.entries.iter_mut() {
            if now.duration_since(entry.requested_at) < timeout {
                continue;
            }
            if let Some(peer) = next_peer(unit) {
                entry.peer = peer;
                entry.requested_at = now;
                reissue.push((*unit, peer));
            }
        }
        reissue
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(b: u8) -> UnitHash {
        UnitHash::from_bytes([b; 32])
    }

    fn peer() -> PeerId {
        PeerId::random()
    }

    #[test]
    fn second_waiter_accumulates_instead_of_resending() {
        let mut table = PendingRequestTable::default();
        let p = peer();
        assert!(matches!(table.register(hash(1), hash(2), p), Register::SendRequest));
        assert!(matches!(table.register(hash(1), hash(3), p), Register::Accumulated));
        let waiters = table.resolve(&hash(1));
        assert_eq!(waiters.len(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn waiters_are_capped() {
        let mut table = PendingRequestTable::default();
        let p = peer();
        table.register(hash(1), hash(0), p);
        for i in 1..MAX_HANDLERS_PER_PENDING_REQUEST as u8 {
            assert!(matches!(table.register(hash(1), hash(i), p), Register::Accumulated));
        }
        assert!(matches!(table.register(hash(1), hash(250), p), Register::TableFull));
    }

    #[test]
    fn stalled_requests_are_reissued_to_a_new_peer() {
        let mut table = PendingRequestTable::default();
        let old = peer();
        let new = peer();
        table.register(hash(1), hash(2), old);
        let reissued = table.sweep_stalled(Duration::from_secs(0), |_| Some(new));
        assert_eq!(reissued, vec![(hash(1), new)]);
    }
}
