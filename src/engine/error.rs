use crate::model::{BookingId, ValidationError};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Validation(ValidationError),
    Conflict { existing: BookingId },
    NotFound(BookingId),
    StoreUnavailable(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "{e}"),
            EngineError::Conflict { existing } => {
                write!(f, "time slot conflicts with booking {existing}")
            }
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::StoreUnavailable(e.to_string())
    }
}
