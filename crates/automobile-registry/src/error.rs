use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("invalid params for tool `{tool}`: {reasons:?}")]
    BadRequest { tool: String, reasons: Vec<String> },

    #[error("tool `{tool}` failed: {cause}")]
    ToolFailure { tool: String, cause: String },

    #[error("failed to compile schema for tool `{tool}`: {source}")]
    SchemaCompile { tool: String, source: String },

    #[error(transparent)]
    Core(#[from] automobile_core::CoreError),
}
