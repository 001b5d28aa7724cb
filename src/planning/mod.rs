mod plan;
mod planner;

pub use plan::*;
pub use planner::*;
