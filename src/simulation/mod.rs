//! The simulation main loop and its run report

pub mod report;
pub mod simulator;

pub use report::{GoalReport, SimulationReport, StalledPeriod};
pub use simulator::{Simulator, StallRecord};
