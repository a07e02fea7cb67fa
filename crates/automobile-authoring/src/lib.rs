#![forbid(unsafe_code)]
//! Test Authoring Manager (Module M) and Plan Parser/Executor (Module N) for
//! the AutoMobile device-automation core: records tool calls into replayable
//! YAML plans, drives the Kotlin code generator, and replays plans back
//! through the tool registry.

mod authoring;
mod error;
mod executor;
mod plan;

pub use authoring::AuthoringManager;
pub use error::AuthoringError;
pub use executor::{ExecutionResult, FailedStep, PlanExecutor};
pub use plan::{parse as parse_plan, serialize as serialize_plan, Plan, Step};
