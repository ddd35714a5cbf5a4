pub mod aa;
pub mod constants;
pub mod error;
pub mod ids;
pub mod unit;

pub use aa::*;
pub use constants::*;
pub use error::WeaveError;
pub use ids::*;
pub use unit::*;
