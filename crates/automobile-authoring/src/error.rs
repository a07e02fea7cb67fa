use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthoringError {
    #[error("a test authoring session is already active for device `{0}`")]
    AlreadyActive(String),

    #[error("no active test authoring session for device `{0}`")]
    NoActiveSession(String),

    #[error("start step {start} is out of bounds for a plan with {total} step(s)")]
    OutOfBounds { start: usize, total: usize },

    #[error("failed to parse plan: {0}")]
    PlanParse(String),

    #[error("failed to serialise plan: {0}")]
    PlanSerialize(String),

    #[error(transparent)]
    Core(#[from] automobile_core::CoreError),
}
