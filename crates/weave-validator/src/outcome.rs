//! The validation outcome taxonomy (§4.5, §7): every way a joint can finish
//! the pipeline, mapped onto [`weave_core::WeaveError`] plus the happy path.

use weave_core::ids::UnitHash;
use weave_core::unit::{Unit, UnitProps};
use weave_core::WeaveError;
use weave_state::SpendAssertion;

/// What happened to one submitted joint.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Structurally and cryptographically sound; ready for the writer (C7)
    /// to save via `StateEngine::save_joint`.
    OkSave { unit: Unit, props: UnitProps, spends: Vec<SpendAssertion> },
    /// Permanently invalid — the author is at fault, never retry this exact unit.
    UnitError(String),
    /// The joint as a whole is malformed (bad envelope), not attributable to
    /// a specific unit error.
    JointError(String),
    /// Missing one or more parents; caller should queue under `unhandled_joints`.
    NeedParents(Vec<UnitHash>),
    /// Node is far enough behind that catchup, not piecewise parent-fetch, is needed.
    NeedHashTree,
    /// Transient failure (lock contention, I/O) — retry the same joint later.
    Transient(String),
    /// A payment message pays an AA an asset outside its declared `bounce_fees`.
    AssetNotAccepted,
}

impl From<WeaveError> for Outcome {
    fn from(e: WeaveError) -> Self {
        match e {
            WeaveError::Structural(m) | WeaveError::Unit(m) => Outcome::UnitError(m),
            WeaveError::Joint(m) => Outcome::JointError(m),
            WeaveError::NeedParents(p) => Outcome::NeedParents(p),
            WeaveError::NeedHashTree => Outcome::NeedHashTree,
            WeaveError::Transient(m) | WeaveError::Storage(m) | WeaveError::Bug(m) => {
                Outcome::Transient(m)
            }
            WeaveError::AssetNotAccepted => Outcome::AssetNotAccepted,
            WeaveError::FormulaFatal(m) | WeaveError::BudgetExceeded(m) => Outcome::UnitError(m),
            WeaveError::ResponseTimeout => Outcome::Transient("response timeout".into()),
        }
    }
}
