// Path Planning module: planning control plane and reference planners

pub mod options;
pub mod quintic_polynomials;
pub mod constraint_filter;
pub mod neighbor;
pub mod configuration;
pub mod bundle;
pub mod status;
pub mod callbacks;
pub mod parameters;
pub mod planner;
pub mod rrt;
pub mod shortcut;

pub use options::*;
pub use quintic_polynomials::*;
pub use constraint_filter::*;
pub use neighbor::*;
pub use configuration::*;
pub use bundle::*;
pub use status::*;
pub use callbacks::*;
pub use parameters::*;
pub use planner::*;
pub use rrt::*;
pub use shortcut::*;
