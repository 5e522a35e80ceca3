//! Chocoo scheduling core: business time, operating hours, slot generation
//! and the booking lifecycle on top of a compare-and-swap store.

#[cfg(feature = "sqlite")]
pub mod db;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod models;
pub mod schedule;
pub mod slots;
pub mod stats;
pub mod store;
pub mod time;
pub mod validation;

pub use error::{BookingError, ErrorKind, StoreError, ValidationError};
pub use lifecycle::{BookingLifecycle, BookingRequest, BookingRules};
pub use store::SchedulingStore;
pub use time::TimePolicy;
