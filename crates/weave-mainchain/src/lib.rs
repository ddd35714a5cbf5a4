pub mod stability;

pub use stability::{BallLookup, MainChainEngine, StabilizationResult, StabilizedUnit, UnitLookup};
