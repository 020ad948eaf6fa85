//! Utility modules for planner_core

pub mod visualization;

pub use visualization::{Visualizer, PathStyle, PointStyle, colors};
