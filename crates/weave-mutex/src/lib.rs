pub mod governor;
pub mod keyed;

pub use governor::{AuthorGuard, ResourceGovernor, WriteGuard};
pub use keyed::{KeyedGuard, KeyedMutex};
