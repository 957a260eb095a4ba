//! Event-queue machinery shared by the simulator and executors

pub mod action_state;
pub mod period;
pub mod queue;
pub mod request;

pub use action_state::{ActionState, ExecutionState};
pub use period::{contiguous_periods, Period};
pub use queue::ActionStateQueue;
pub use request::{
    ActionRequest, AdjustToPartialRequest, ChangedAction, MultiRequest,
    RemoveActionsWithStateRequest, Request,
};
