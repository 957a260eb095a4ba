use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("cannot {transition} action in state {state}: {action}")]
    ExecutionState {
        transition: &'static str,
        state: String,
        action: String,
    },

    #[error("action is not applicable at {time}: {action}")]
    NotApplicable { time: Decimal, action: String },

    #[error("agent {agent} has stalled at {time}: {action}")]
    Stalled {
        agent: String,
        time: Decimal,
        action: String,
    },

    #[error("temp node already exists: {0}")]
    TempNodeCollision(String),

    #[error("action starts at {start} but the clock is already at {now}: {action}")]
    StartTimeInPast {
        start: Decimal,
        now: Decimal,
        action: String,
    },

    #[error("planner found no plan")]
    NoPlan,

    #[error("plan output ended mid-block: {0}")]
    IncompletePlan(String),

    #[error("cannot decode plan line: {0}")]
    PlanDecode(String),

    #[error("unknown object: {0}")]
    UnknownObject(String),

    #[error("unknown edge: {0}")]
    UnknownEdge(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("task requirements form a cycle through goal {0}")]
    AllocationCycle(String),

    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("planner process error: {0}")]
    Planner(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl SimError {
    /// Errors that indicate a bug in scheduling rather than bad input
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SimError::ExecutionState { .. }
                | SimError::NotApplicable { .. }
                | SimError::Stalled { .. }
                | SimError::TempNodeCollision(_)
                | SimError::StartTimeInPast { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
