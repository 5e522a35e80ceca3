//! The authoritative slot/booking store.
//!
//! Every write is a compare-and-swap against the state the caller last saw,
//! committed as one unit: either all rows change or none do. Callers must
//! treat `StoreError::Conflict` as "someone else got there first".

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::StoreError;
use crate::models::*;

#[async_trait]
pub trait SchedulingStore: Send + Sync {
    async fn service(&self, id: i64) -> Result<Option<Service>, StoreError>;

    async fn client(&self, id: i64) -> Result<Option<ClientProfile>, StoreError>;

    async fn slot(&self, id: i64) -> Result<Option<Slot>, StoreError>;

    /// Ordered by start time.
    async fn slots_for_date(&self, date: NaiveDate) -> Result<Vec<Slot>, StoreError>;

    async fn booking(&self, id: i64) -> Result<Option<Booking>, StoreError>;

    async fn booking_detail(&self, id: i64) -> Result<Option<BookingDetail>, StoreError>;

    /// Confirmed bookings whose slot date lies in `from..=to`, by date and time.
    async fn confirmed_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BookingDetail>, StoreError>;

    async fn templates(&self) -> Result<Vec<ScheduleTemplate>, StoreError>;

    /// Inserts all drafts for `date`, or nothing if the date already has slots.
    async fn insert_slots(
        &self,
        date: NaiveDate,
        drafts: &[SlotDraft],
    ) -> Result<Vec<Slot>, StoreError>;

    /// Slot available→booked, service still active, booking inserted as confirmed.
    async fn book_slot(&self, draft: &BookingDraft) -> Result<Booking, StoreError>;

    /// Booking confirmed→cancelled and its slot booked→available.
    async fn release_booking(&self, booking_id: i64, slot_id: i64) -> Result<Booking, StoreError>;

    /// New slot available→booked, booking moved, old slot booked→available.
    async fn move_booking(
        &self,
        booking_id: i64,
        from_slot: i64,
        to_slot: i64,
    ) -> Result<Booking, StoreError>;

    async fn set_slot_status(
        &self,
        slot_id: i64,
        expected: SlotStatus,
        next: SlotStatus,
    ) -> Result<Slot, StoreError>;

    /// Confirmed→completed. `false` if the booking was no longer confirmed.
    async fn complete_booking(&self, booking_id: i64) -> Result<bool, StoreError>;

    /// Sets the reminded flag once. `false` if it was already set or the booking left `confirmed`.
    async fn mark_reminded(&self, booking_id: i64) -> Result<bool, StoreError>;
}
