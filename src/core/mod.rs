//! Core template logic — types, parsing, resolution, planning, execution.

pub mod executor;
pub mod graph;
pub mod intrinsics;
pub mod params;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod types;
