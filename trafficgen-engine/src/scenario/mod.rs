//! Scenario loading and execution.
//!
//! The loader turns a scenario document into an immutable [`Scenario`]; the
//! runner executes (or validates) its runs one after the other, building a
//! fresh [`RunContext`] for each.
//!
//! [`Scenario`]: trafficgen_shared::scenario::Scenario

pub mod context;
pub mod loader;
pub mod runner;

pub use context::RunContext;
pub use loader::load_scenario;
pub use runner::{
    PrepareError, RunPlan, RunReport, RunnerConfig, ScenarioReport, ScenarioRunner,
    ValidationReport,
};
