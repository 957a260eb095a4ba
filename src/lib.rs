//! Plan Sim - discrete-event simulation of multi-agent temporal plan execution
//!
//! Agents execute timed plans over a partially observable world. Surprises
//! revealed during execution trigger replanning, either by a market of
//! per-agent planners or by one central planner.

pub mod actions;
pub mod allocation;
pub mod core;
pub mod domain;
pub mod execution;
pub mod executor;
pub mod model;
pub mod planner;
pub mod simulation;
