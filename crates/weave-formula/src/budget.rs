//! Deterministic resource budget for one formula evaluation (§4.8).
//!
//! Threaded explicitly through every evaluation call rather than tracked via
//! exceptions or thread-local state, so the same (def, trigger) pair costs
//! the same budget on every node.

use weave_core::constants::{MAX_COMPLEXITY, MAX_OPS};

#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub complexity: u32,
    pub ops: u32,
}

impl Default for Budget {
    fn default() -> Self {
        Self { complexity: 0, ops: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetError {
    ComplexityExceeded,
    OpsExceeded,
}

impl std::fmt::Display for BudgetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetError::ComplexityExceeded => write!(f, "MAX_COMPLEXITY exceeded"),
            BudgetError::OpsExceeded => write!(f, "MAX_OPS exceeded"),
        }
    }
}

impl Budget {
    /// Charge one tree-node visit against the complexity ceiling.
    pub fn tick_complexity(&mut self) -> Result<(), BudgetError> {
        self.complexity += 1;
        if self.complexity > MAX_COMPLEXITY {
            return Err(BudgetError::ComplexityExceeded);
        }
        Ok(())
    }

    /// Charge `n` primitive operations against the op ceiling.
    pub fn tick_ops(&mut self, n: u32) -> Result<(), BudgetError> {
        self.ops += n;
        if self.ops > MAX_OPS {
            return Err(BudgetError::OpsExceeded);
        }
        Ok(())
    }
}
