use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventsError {
    #[error(transparent)]
    Core(#[from] automobile_core::CoreError),
}
