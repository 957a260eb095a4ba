//! Run configuration
//!
//! Values come from an optional TOML file and may be overridden on the command line.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::{Result, SimError};

/// What the simulator does when an action cannot start or finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StallPolicy {
    /// Abort the run
    #[default]
    Error,
    /// Park the agent until its coordinator replans
    Defer,
}

/// Which executor coordinates the agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorKind {
    /// Market-based task allocation followed by per-agent local planning
    #[default]
    Market,
    /// One planner producing a joint plan for every agent
    Central,
}

/// How the central planner truncates in-flight actions when it replans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplanPolicy {
    /// Cut every in-flight action short at the moment planning starts
    #[default]
    Partial,
    /// Let actions that end inside the planning window finish, drop the rest
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlannerKind {
    /// In-process planner built on graph search
    #[default]
    Heuristic,
    /// External PDDL solver run as a subprocess
    Process,
}

/// Settings for the planner boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub kind: PlannerKind,

    /// Solver binary invoked as `<executable> [-N] <domain> <problem>`
    pub executable: Option<PathBuf>,

    /// PDDL domain file handed to the solver
    pub domain_file: Option<PathBuf>,

    /// Directory receiving generated problem files
    pub working_directory: PathBuf,

    /// Ask the solver for its first plan only (`-N`)
    ///
    /// In this mode an empty output is an empty plan rather than a failure.
    pub first_plan_only: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            kind: PlannerKind::Heuristic,
            executable: None,
            domain_file: None,
            working_directory: std::env::temp_dir(),
            first_plan_only: false,
        }
    }
}

/// Configuration for a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    // === PLANNING ===
    /// Simulated time budget of a planning action (central `Plan` or per-agent `LocalPlan`)
    ///
    /// Agents whose won bids depend on other agents start their local planning
    /// this much later, so the plans they depend on exist first.
    pub planning_time: Decimal,

    /// Simulated time charged for each call to the heuristic planner
    ///
    /// Keeps runs deterministic: wall-clock time never leaks into the simulation.
    pub heuristic_planning_time: Decimal,

    pub planner: PlannerConfig,

    // === COORDINATION ===
    pub coordinator: CoordinatorKind,

    /// Only read when `coordinator = "central"`
    pub replan_policy: ReplanPolicy,

    pub stall_policy: StallPolicy,

    // === OUTPUT ===
    /// Directory for JSON run reports
    pub log_directory: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            planning_time: Decimal::from(10),
            heuristic_planning_time: Decimal::ONE,
            planner: PlannerConfig::default(),
            coordinator: CoordinatorKind::Market,
            replan_policy: ReplanPolicy::Partial,
            stall_policy: StallPolicy::Error,
            log_directory: None,
        }
    }
}

impl SimulationConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(text)?;
        config.validate().map_err(SimError::Config)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.planning_time <= Decimal::ZERO {
            return Err(format!(
                "planning_time ({}) must be positive",
                self.planning_time
            ));
        }

        if self.heuristic_planning_time <= Decimal::ZERO {
            return Err(format!(
                "heuristic_planning_time ({}) must be positive",
                self.heuristic_planning_time
            ));
        }

        if self.planner.kind == PlannerKind::Process {
            if self.planner.executable.is_none() {
                return Err("process planner requires planner.executable".into());
            }
            if self.planner.domain_file.is_none() {
                return Err("process planner requires planner.domain_file".into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stall_policy, StallPolicy::Error);
        assert_eq!(config.coordinator, CoordinatorKind::Market);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SimulationConfig::from_toml_str(
            r#"
            planning_time = 4
            stall_policy = "defer"
            coordinator = "central"
            replan_policy = "finish"
            "#,
        )
        .unwrap();

        assert_eq!(config.planning_time, Decimal::from(4));
        assert_eq!(config.heuristic_planning_time, Decimal::ONE);
        assert_eq!(config.stall_policy, StallPolicy::Defer);
        assert_eq!(config.coordinator, CoordinatorKind::Central);
        assert_eq!(config.replan_policy, ReplanPolicy::Finish);
    }

    #[test]
    fn test_process_planner_needs_executable() {
        let result = SimulationConfig::from_toml_str(
            r#"
            [planner]
            kind = "process"
            "#,
        );
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn test_non_positive_planning_time_rejected() {
        let mut config = SimulationConfig::default();
        config.planning_time = Decimal::ZERO;
        assert!(config.validate().is_err());
    }
}
