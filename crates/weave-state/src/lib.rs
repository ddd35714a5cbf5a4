pub mod cache;
pub mod db;
pub mod engine;

pub use cache::Cache;
pub use db::{KvBatch, StateDb};
pub use engine::{SpendAssertion, StateEngine};
