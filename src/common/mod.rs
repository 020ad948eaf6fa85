//! Common types, traits, and error definitions for planner_core
//!
//! This module provides the live state, trajectory and report types and
//! the capability traits every planning function implements.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
