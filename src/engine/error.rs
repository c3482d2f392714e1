use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Missing or malformed input.
    Validation(&'static str),
    /// A requested date is outside the vehicle's availability set.
    NotOffered(NaiveDate),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Date overlap with the given booking.
    Conflict(Ulid),
    /// A journey record already exists for the booking.
    DuplicateJourney(Ulid),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// Post-journey fields already recorded for the booking.
    AlreadyFinished(Ulid),
    NotConfirmed {
        id: Ulid,
        status: BookingStatus,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// SQLSTATE surfaced at the wire boundary.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Validation(_) | EngineError::NotOffered(_) => "22023",
            EngineError::NotFound(_) => "02000",
            EngineError::AlreadyExists(_) | EngineError::DuplicateJourney(_) => "23505",
            EngineError::Conflict(_) => "23P01",
            EngineError::InvalidTransition { .. }
            | EngineError::AlreadyFinished(_)
            | EngineError::NotConfirmed { .. } => "55000",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::WalError(_) => "58030",
        }
    }

    /// Transient infrastructure failure; the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotOffered(date) => {
                write!(f, "vehicle is not offered on {date}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => {
                write!(f, "vehicle is not available for these dates (conflicts with booking {id})")
            }
            EngineError::DuplicateJourney(id) => {
                write!(f, "journey already started for booking {id}")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::AlreadyFinished(id) => {
                write!(f, "journey already finished for booking {id}")
            }
            EngineError::NotConfirmed { id, status } => {
                write!(f, "booking {id} is {status}, journey requires confirmed")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
