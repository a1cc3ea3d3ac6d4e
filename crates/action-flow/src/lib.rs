//! Execution driver
//!
//! Turns queue entries and run-list entries into [`PlannedStep`]s and dispatches them one at
//! a time against a page, highlighting each target first and pausing between steps.

pub mod errors;
pub mod executor;
pub mod strategies;
pub mod types;

pub use errors::FlowError;
pub use executor::{
    clamp_delay_secs, DriverOptions, ExecutionDriver, FlowExecutor, DEFAULT_DELAY_SECS,
    MAX_DELAY_SECS, MIN_DELAY_SECS,
};
pub use strategies::{DefaultFailureHandler, FailureHandler, FailureHandlerResult};
pub use types::{
    FailureStrategy, PlannedStep, RunReport, StepAction, StepPlan, StepResult, StepStatus,
};
