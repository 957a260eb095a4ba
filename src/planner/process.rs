//! External PDDL solver run as a subprocess
//!
//! Each call writes the problem to a fresh file, runs
//! `<executable> [-N] <domain> <problem>` and decodes its standard output.
//! In anytime mode the solver is killed once the planning budget elapses and
//! the best plan printed so far is used.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::runtime::Runtime;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{decode_plan_output, encode_problem, PlanOutcome, PlanRequest, Planner};
use crate::core::accuracy::quantize;
use crate::core::config::PlannerConfig;
use crate::core::error::{Result, SimError};
use crate::domain::DomainContext;

pub struct PddlPlanner {
    executable: PathBuf,
    domain_file: PathBuf,
    working_directory: PathBuf,
    first_plan_only: bool,
    domain: Arc<dyn DomainContext>,
    runtime: Runtime,
    /// One solver at a time
    lock: Mutex<()>,
}

impl PddlPlanner {
    pub fn new(config: &PlannerConfig, domain: Arc<dyn DomainContext>) -> Result<Self> {
        let executable = config
            .executable
            .clone()
            .ok_or_else(|| SimError::Config("planner.executable is required".into()))?;
        let domain_file = config
            .domain_file
            .clone()
            .ok_or_else(|| SimError::Config("planner.domain_file is required".into()))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            executable,
            domain_file,
            working_directory: config.working_directory.clone(),
            first_plan_only: config.first_plan_only,
            domain,
            runtime,
            lock: Mutex::new(()),
        })
    }

    async fn invoke(&self, problem: &Path, budget: Duration) -> Result<String> {
        let mut command = Command::new(&self.executable);
        if self.first_plan_only {
            command.arg("-N");
        }
        command
            .arg(&self.domain_file)
            .arg(problem)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            SimError::Planner(format!("cannot start {}: {}", self.executable.display(), e))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SimError::Planner("solver stdout not captured".into()))?;
        let mut reader = BufReader::new(stdout);
        let mut output = String::new();

        if self.first_plan_only {
            while reader.read_line(&mut output).await? > 0 {}
            child.wait().await?;
            return Ok(output);
        }

        let deadline = Instant::now() + budget;
        loop {
            let mut line = String::new();
            match tokio::time::timeout_at(deadline, reader.read_line(&mut line)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => output.push_str(&line),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    debug!(budget = ?budget, "planning budget elapsed, stopping solver");
                    child.start_kill()?;
                    break;
                }
            }
        }
        child.wait().await?;
        Ok(output)
    }
}

impl Planner for PddlPlanner {
    fn get_plan(&self, request: &PlanRequest) -> Result<PlanOutcome> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| SimError::Planner("planner lock poisoned".into()))?;

        let budget = request
            .planning_time
            .to_f64()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
            .ok_or_else(|| {
                SimError::Config(format!("invalid planning time: {}", request.planning_time))
            })?;

        let problem = self
            .working_directory
            .join(format!("{}.pddl", Uuid::new_v4()));
        std::fs::write(&problem, encode_problem(request)?)?;
        debug!(problem = %problem.display(), agent = ?request.agent, "invoking solver");

        let started = Instant::now();
        let output = self.runtime.block_on(self.invoke(&problem, budget));
        let elapsed = started.elapsed().as_millis();

        if let Err(e) = std::fs::remove_file(&problem) {
            warn!(problem = %problem.display(), error = %e, "cannot remove problem file");
        }
        let output = output?;
        let time_taken = quantize(Decimal::new(i64::try_from(elapsed).unwrap_or(i64::MAX), 3));

        match decode_plan_output(&output, self.domain.catalog(), self.first_plan_only) {
            Ok(plan) => Ok(PlanOutcome::found(plan, time_taken)),
            Err(SimError::NoPlan) | Err(SimError::IncompletePlan(_)) => {
                info!(agent = ?request.agent, %time_taken, "solver found no plan");
                Ok(PlanOutcome::failed(time_taken))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain;
    use crate::model::Model;

    /// Runs `/bin/sh <script> <problem>` so the script stands in for a solver
    fn planner(dir: &Path, script: &str) -> PddlPlanner {
        let script_path = dir.join("solver.sh");
        std::fs::write(&script_path, script).unwrap();
        let config = PlannerConfig {
            executable: Some(PathBuf::from("/bin/sh")),
            domain_file: Some(script_path),
            working_directory: dir.to_path_buf(),
            ..PlannerConfig::default()
        };
        PddlPlanner::new(&config, domain::for_name("janitor").unwrap()).unwrap()
    }

    fn request(model: &Model, planning_time: Decimal) -> PlanRequest<'_> {
        PlanRequest {
            model,
            agent: Some("agent1"),
            goals: &[],
            metric: None,
            planning_time,
            origin: Decimal::ZERO,
            events: &[],
        }
    }

    #[test]
    fn test_solver_output_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(
            dir.path(),
            "test -f \"$1\" || exit 1\necho '; Plan found'\necho '0.000: (move agent1 rm1 rm2)  [3.000]'\necho ''\n",
        );
        let model = Model::new("janitor");

        let outcome = planner.get_plan(&request(&model, Decimal::from(10))).unwrap();

        let plan = outcome.plan.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].type_name(), "Move");
        assert_eq!(plan[0].duration(), Decimal::from(3));
    }

    #[test]
    fn test_problem_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(dir.path(), "echo ''\n");
        let model = Model::new("janitor");

        planner.get_plan(&request(&model, Decimal::from(10))).unwrap();

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "pddl"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_no_output_means_no_plan() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(dir.path(), "echo '; Problem unsolvable!'\n");
        let model = Model::new("janitor");

        let outcome = planner.get_plan(&request(&model, Decimal::from(10))).unwrap();
        assert!(outcome.plan.is_none());
    }

    #[test]
    fn test_solver_is_stopped_at_budget() {
        let dir = tempfile::tempdir().unwrap();
        let planner = planner(
            dir.path(),
            "echo '0.000: (clean agent1 rm1)  [5.000]'\necho ''\nexec sleep 5\n",
        );
        let model = Model::new("janitor");

        let outcome = planner.get_plan(&request(&model, Decimal::ONE)).unwrap();

        assert_eq!(outcome.plan.map(|p| p.len()), Some(1));
        assert!(outcome.time_taken < Decimal::from(4));
    }

    #[test]
    fn test_missing_executable_is_a_config_error() {
        let result = PddlPlanner::new(
            &PlannerConfig::default(),
            domain::for_name("janitor").unwrap(),
        );
        assert!(matches!(result, Err(SimError::Config(_))));
    }
}
