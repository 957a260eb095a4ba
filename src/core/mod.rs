pub mod accuracy;
pub mod config;
pub mod error;
pub mod types;

pub use accuracy::{
    as_end_time, as_start_time, quantize, to_prev_start_time, INCREMENT,
    INSTANTANEOUS_ACTION_DURATION, TICK,
};
pub use types::Deadline;
