//! The AA composer (C9, §4.9): dequeues `aa_triggers`, evaluates the
//! triggered AA's definition against [`weave_formula`], and commits the
//! resulting state/balance effects through [`weave_state::StateEngine`].

pub mod composer;
pub mod env;
pub mod template;

pub use composer::Composer;

use weave_core::ids::Address;

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("storage error: {0}")]
    Storage(#[from] weave_core::WeaveError),
    #[error("trigger references an address with no AA definition")]
    NotAnAa,
    #[error("base_aa {0} has no published definition")]
    MissingBaseAa(Address),
    #[error("trigger unit not found in storage")]
    MissingUnit,
    #[error("failed to hash response unit: {0}")]
    Hashing(String),
}
