use thiserror::Error;

/// The error taxonomy of §7: every failure mode crosses an async boundary as
/// one of these explicit values, never as a thrown exception.
#[derive(Debug, Error, Clone)]
pub enum WeaveError {
    // ── Structural / unit-permanent ──────────────────────────────────────────
    #[error("structural error: {0}")]
    Structural(String),

    #[error("unit error: {0}")]
    Unit(String),

    // ── Joint-level, possibly retryable with a different joint ──────────────
    #[error("joint error: {0}")]
    Joint(String),

    /// Missing one or more parents; queue in `unhandled_joints`.
    #[error("need parents: {0:?}")]
    NeedParents(Vec<crate::ids::UnitHash>),

    /// Node is too far behind; needs a catchup hash tree.
    #[error("need hash tree")]
    NeedHashTree,

    /// Retry later; not an error attributable to the author.
    #[error("transient: {0}")]
    Transient(String),

    /// Payment to an AA carries an asset not in its declared `bounce_fees`.
    #[error("asset not accepted by AA")]
    AssetNotAccepted,

    // ── Formula evaluator (C8) ────────────────────────────────────────────────
    #[error("formula fatal: {0}")]
    FormulaFatal(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    // ── Network ──────────────────────────────────────────────────────────────
    #[error("response timeout")]
    ResponseTimeout,

    // ── Storage ──────────────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    // ── Catch-all for invariant violations ───────────────────────────────────
    #[error("bug: {0}")]
    Bug(String),
}

impl From<sled::Error> for WeaveError {
    fn from(e: sled::Error) -> Self {
        WeaveError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for WeaveError {
    fn from(e: bincode::Error) -> Self {
        WeaveError::Storage(format!("serialization: {e}"))
    }
}
