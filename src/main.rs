//! Plan Sim - Entry Point
//!
//! Loads a problem, runs it to completion and prints the JSON run report.
//! Exits non-zero unless every goal was achieved.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use plan_sim::core::config::{CoordinatorKind, PlannerKind, SimulationConfig};
use plan_sim::core::error::{Result, SimError};
use plan_sim::core::types::Deadline;
use plan_sim::domain;
use plan_sim::model::Model;
use plan_sim::planner::planner_for;
use plan_sim::simulation::{SimulationReport, Simulator};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

/// Simulate agents executing temporal plans under partial observability
#[derive(Parser, Debug)]
#[command(name = "plan-sim")]
#[command(about = "Run a multi-agent plan execution simulation and report goal achievement")]
struct Args {
    /// Problem file (JSON model)
    problem: PathBuf,

    /// PDDL domain file handed to the process planner
    #[arg(long)]
    domain: Option<PathBuf>,

    /// Simulated budget of each planning action
    #[arg(long)]
    planning_time: Option<Decimal>,

    /// Simulated time charged per heuristic planner call
    #[arg(long)]
    heuristic_planning_time: Option<Decimal>,

    /// Directory receiving `<problem>.json` reports
    #[arg(long)]
    log_directory: Option<PathBuf>,

    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    planner: Option<PlannerKind>,

    #[arg(long, value_enum)]
    coordinator: Option<CoordinatorKind>,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plan_sim=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "simulation failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<SimulationConfig> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(file) = &args.domain {
        config.planner.domain_file = Some(file.clone());
    }
    if let Some(time) = args.planning_time {
        config.planning_time = time;
    }
    if let Some(time) = args.heuristic_planning_time {
        config.heuristic_planning_time = time;
    }
    if let Some(dir) = &args.log_directory {
        config.log_directory = Some(dir.clone());
    }
    if let Some(kind) = args.planner {
        config.planner.kind = kind;
    }
    if let Some(kind) = args.coordinator {
        config.coordinator = kind;
    }
    config.validate().map_err(SimError::Config)?;
    Ok(config)
}

/// Run the problem; `Ok(true)` when every goal was achieved
fn run(args: &Args) -> Result<bool> {
    let config = load_config(args)?;
    let model = Model::load(&args.problem)?;
    let domain = domain::for_name(&model.domain)?;
    let planner = planner_for(&config, domain.clone())?;
    let log_directory = config.log_directory.clone();

    let mut simulator = Simulator::new(model, domain, planner, config)?;
    let outcome = simulator.run(Deadline::Never);

    // The report goes out even when the run failed
    let report = simulator.report();
    write_report(&report, &args.problem, log_directory.as_deref())?;
    outcome?;

    tracing::info!(
        goals = %report.goal_achieved.fraction,
        end = %report.end_simulation_time,
        planning = %report.time_planning_total,
        "simulation complete"
    );
    Ok(report.is_success())
}

fn write_report(report: &SimulationReport, problem: &Path, log_directory: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    println!("{}", json);
    if let Some(dir) = log_directory {
        fs::create_dir_all(dir)?;
        let stem = problem
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());
        let path = dir.join(format!("{}.json", stem));
        fs::write(&path, json)?;
        tracing::info!(path = %path.display(), "report written");
    }
    Ok(())
}
