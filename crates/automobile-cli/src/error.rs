use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] automobile_core::CoreError),

    #[error(transparent)]
    Authoring(#[from] automobile_authoring::AuthoringError),

    #[error("{0}")]
    Tool(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
