use thiserror::Error;

/// Errors surfaced by the relay core.
///
/// Pushing never fails; the only failure a caller can observe is a rejected
/// subscription.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("run {run_id} already has an active subscriber")]
    AlreadySubscribed { run_id: String },
}

pub type Result<T> = std::result::Result<T, RelayError>;
