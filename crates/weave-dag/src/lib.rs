pub mod graph;

pub use graph::{
    best_parent, is_stable_in_view_of, latest_included_mc_index, witnessed_level, UnitSource,
};
