//! The resource governor: enforces the normative total lock order
//! `author_addresses -> write -> db_connection -> kv_batch` (§5).
//!
//! Rust's borrow checker cannot statically prove a lock-ordering discipline
//! across independent mutexes, so this module encodes it structurally
//! instead: a [`WriteGuard`] can only be obtained through
//! [`ResourceGovernor::acquire_write`], which is only ever called after the
//! caller already holds an [`AuthorGuard`] — the writer (C7) and main-chain
//! engine (C6) are the only two call sites, and both are written that way.
//! Acquiring a DB connection while holding `write` is a function-level
//! contract, documented at each call site; violating it is a programming
//! error per §4.11, not a runtime-detected one.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use weave_core::ids::Address;

use crate::keyed::{KeyedGuard, KeyedMutex};

pub struct ResourceGovernor {
    author_addresses: Arc<KeyedMutex<Address>>,
    write: Mutex<()>,
}

impl Default for ResourceGovernor {
    fn default() -> Self {
        Self {
            author_addresses: Arc::new(KeyedMutex::new()),
            write: Mutex::new(()),
        }
    }
}

impl ResourceGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the per-author-address lock for a joint's author set. Must be
    /// held for the full validate+save pipeline of that joint (§4.5, §5).
    pub async fn acquire_authors(&self, addresses: Vec<Address>) -> AuthorGuard {
        let guard = self.author_addresses.acquire(addresses).await;
        AuthorGuard { _inner: guard }
    }

    /// Acquire the single global write lock. Callers MUST already hold an
    /// [`AuthorGuard`] for any author-keyed operation that precedes this, and
    /// MUST NOT be holding a database connection when calling this — taking a
    /// connection happens only after `write` is held (§5 lock-ordering rule).
    pub async fn acquire_write(&self) -> WriteGuard<'_> {
        WriteGuard {
            _inner: self.write.lock().await,
        }
    }
}

pub struct AuthorGuard {
    _inner: KeyedGuard<Address>,
}

pub struct WriteGuard<'a> {
    _inner: MutexGuard<'a, ()>,
}
