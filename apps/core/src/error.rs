use chrono::{Duration, NaiveDate};
use thiserror::Error;

use crate::models::{BookingStatus, SlotStatus};

/// Coarse classification shared by every error the core and the client raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; never reaches the store.
    Validation,
    /// The authoritative state does not allow the operation.
    Conflict,
    NotFound,
    /// The store (or the network in front of it) failed.
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("phone must look like +375291234567")]
    InvalidPhone,
    #[error("consent to personal data processing is required")]
    ConsentRequired,
    #[error("name must not be empty")]
    EmptyName,
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("month must be formatted as YYYY-MM")]
    InvalidMonth,
    #[error("slot interval must be positive")]
    NonPositiveInterval,
    #[error("window end must be after its start")]
    EmptyWindow,
    #[error("day of week must be within 0..=6")]
    InvalidWeekday,
    #[error("duplicate template for day {0}")]
    DuplicateWeekday(i64),
    #[error("cannot generate slots for past date {0}")]
    PastDate(NaiveDate),
    #[error("reminder lead time of {0}h is not offered")]
    InvalidReminder(i64),
    #[error("booking is already on that slot")]
    SameSlot,
    #[error("slot status can only be toggled between available and blocked")]
    InvalidSlotStatus,
}

/// Reasons the store refuses a compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// The slot was not in the expected status at commit time.
    SlotState { slot_id: i64, actual: SlotStatus },
    /// The booking is no longer confirmed (or no longer on the expected slot).
    BookingState { booking_id: i64 },
    ServiceInactive { service_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("write conflict: {0:?}")]
    Conflict(Conflict),
    #[error("slots for {0} already exist")]
    AlreadyGenerated(NaiveDate),
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        StoreError::NotFound { entity, id }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("slot {0} is not available")]
    SlotUnavailable(i64),
    #[error("client profile needs consent and a valid phone before booking")]
    ClientNotEligible,
    #[error("service {0} is no longer offered")]
    ServiceInactive(i64),
    #[error("cancellation closes {min_hours}h before the appointment ({} min left)", .remaining.num_minutes())]
    CancellationWindowExpired { min_hours: i64, remaining: Duration },
    #[error("booking must be made at least {min_hours}h in advance")]
    BookingTooLate { min_hours: i64 },
    #[error("slot {0} is booked; cancel the booking first")]
    SlotOccupied(i64),
    #[error("slot {0} has already started")]
    SlotInPast(i64),
    #[error("booking {id} is {status:?}")]
    BookingNotActive { id: i64, status: BookingStatus },
    #[error("slots for {0} already exist")]
    AlreadyGenerated(NaiveDate),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("store failure: {0}")]
    Store(String),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::Validation(_) | BookingError::ClientNotEligible => ErrorKind::Validation,
            BookingError::NotFound { .. } => ErrorKind::NotFound,
            BookingError::Store(_) => ErrorKind::Transient,
            BookingError::SlotUnavailable(_)
            | BookingError::ServiceInactive(_)
            | BookingError::CancellationWindowExpired { .. }
            | BookingError::BookingTooLate { .. }
            | BookingError::SlotOccupied(_)
            | BookingError::SlotInPast(_)
            | BookingError::BookingNotActive { .. }
            | BookingError::AlreadyGenerated(_) => ErrorKind::Conflict,
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => BookingError::NotFound { entity, id },
            StoreError::AlreadyGenerated(date) => BookingError::AlreadyGenerated(date),
            StoreError::Conflict(Conflict::SlotState { slot_id, .. }) => {
                BookingError::SlotUnavailable(slot_id)
            }
            StoreError::Conflict(Conflict::ServiceInactive { service_id }) => {
                BookingError::ServiceInactive(service_id)
            }
            // Whatever the booking turned into, it is no longer confirmed.
            StoreError::Conflict(Conflict::BookingState { booking_id }) => {
                BookingError::BookingNotActive {
                    id: booking_id,
                    status: BookingStatus::Cancelled,
                }
            }
            StoreError::Backend(msg) => BookingError::Store(msg),
        }
    }
}
