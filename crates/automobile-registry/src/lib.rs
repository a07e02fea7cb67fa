#![forbid(unsafe_code)]
//! Tool Registry & Executor (Module L) for the AutoMobile device-automation
//! core: validates and dispatches named tool calls against JSON Schema,
//! records them for the active test authoring session, and nudges the app
//! lifecycle monitor afterward.

mod error;
mod registry;

pub use error::RegistryError;
pub use registry::{
    ToolCallLogEntry, ToolCallRecorder, ToolHandler, ToolRegistry, ToolResponse,
};
