//! The slot/booking state machine.
//!
//! Every operation pre-checks against a fresh read so callers get a precise
//! reason, then commits through one compare-and-swap on the store. The store
//! re-validates everything at commit time, so a race lost between the read
//! and the write still fails cleanly instead of corrupting state.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use std::sync::Arc;

use crate::error::{BookingError, Conflict, StoreError, ValidationError};
use crate::models::*;
use crate::schedule::{self, DayWindow, ScheduleDefaults};
use crate::slots;
use crate::store::SchedulingStore;
use crate::time::TimePolicy;

/// Reminder lead times a client may choose from.
pub const REMINDER_HOURS: [i64; 6] = [1, 2, 3, 6, 12, 24];
pub const DEFAULT_REMINDER_HOURS: i64 = 2;

/// How far back the completion sweep looks.
const COMPLETION_SCAN_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRules {
    /// Clients may cancel only while at least this much time remains.
    pub cancel_lead_hours: i64,
    /// Bookings must be made at least this far ahead.
    pub min_booking_lead_hours: i64,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            cancel_lead_hours: 10,
            min_booking_lead_hours: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct BookingRequest {
    pub client_id: i64,
    pub service_id: i64,
    pub slot_id: i64,
    pub remind_before_hours: Option<i64>,
}

#[derive(Clone)]
pub struct BookingLifecycle {
    store: Arc<dyn SchedulingStore>,
    time: TimePolicy,
    rules: BookingRules,
    defaults: ScheduleDefaults,
}

impl BookingLifecycle {
    pub fn new(store: Arc<dyn SchedulingStore>, time: TimePolicy) -> Self {
        Self {
            store,
            time,
            rules: BookingRules::default(),
            defaults: ScheduleDefaults::default(),
        }
    }

    pub fn with_rules(mut self, rules: BookingRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_defaults(mut self, defaults: ScheduleDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn store(&self) -> &Arc<dyn SchedulingStore> {
        &self.store
    }

    pub fn time(&self) -> &TimePolicy {
        &self.time
    }

    pub fn rules(&self) -> BookingRules {
        self.rules
    }

    // ── Client operations ──

    pub async fn create(&self, req: &BookingRequest) -> Result<BookingDetail, BookingError> {
        let remind_before_hours = req.remind_before_hours.unwrap_or(DEFAULT_REMINDER_HOURS);
        if !REMINDER_HOURS.contains(&remind_before_hours) {
            return Err(ValidationError::InvalidReminder(remind_before_hours).into());
        }

        let client = self
            .store
            .client(req.client_id)
            .await?
            .ok_or(BookingError::NotFound {
                entity: "client",
                id: req.client_id,
            })?;
        if !crate::validation::is_client_eligible(&client) {
            return Err(BookingError::ClientNotEligible);
        }

        let service = self
            .store
            .service(req.service_id)
            .await?
            .ok_or(BookingError::NotFound {
                entity: "service",
                id: req.service_id,
            })?;
        if !service.is_active {
            return Err(BookingError::ServiceInactive(service.id));
        }

        let slot = self.load_slot(req.slot_id).await?;
        if slot.status != SlotStatus::Available {
            return Err(BookingError::SlotUnavailable(slot.id));
        }
        let until = self.time.duration_until(slot.date, slot.start_time);
        if until < Duration::hours(self.rules.min_booking_lead_hours) {
            return Err(BookingError::BookingTooLate {
                min_hours: self.rules.min_booking_lead_hours,
            });
        }

        let draft = BookingDraft {
            client_id: client.id,
            service_id: service.id,
            slot_id: slot.id,
            remind_before_hours,
            created_at: self.time.now_naive(),
        };
        let booking = self.store.book_slot(&draft).await.map_err(|e| {
            tracing::warn!("Booking slot {} lost at commit: {}", slot.id, e);
            BookingError::from(e)
        })?;

        tracing::info!(
            "Booking {} created: client {} slot {} ({} {})",
            booking.id,
            client.id,
            slot.id,
            slot.date,
            slot.start_time.format("%H:%M")
        );
        self.load_detail(booking.id).await
    }

    /// Cancels the caller's own booking while the cancellation window is open.
    pub async fn client_cancel(
        &self,
        client_id: i64,
        booking_id: i64,
    ) -> Result<BookingDetail, BookingError> {
        self.client_cancel_at(client_id, booking_id, self.time.now())
            .await
    }

    /// Same as [`client_cancel`](Self::client_cancel), with the window
    /// evaluated at `as_of`.
    pub async fn client_cancel_at(
        &self,
        client_id: i64,
        booking_id: i64,
        as_of: DateTime<FixedOffset>,
    ) -> Result<BookingDetail, BookingError> {
        let booking = self.load_booking(booking_id).await?;
        // Someone else's booking looks exactly like a missing one.
        if booking.client_id != client_id {
            return Err(BookingError::NotFound {
                entity: "booking",
                id: booking_id,
            });
        }
        ensure_confirmed(&booking)?;

        let slot = self.load_slot(booking.slot_id).await?;
        let remaining = self
            .time
            .duration_until_at(slot.date, slot.start_time, as_of);
        if remaining < Duration::hours(self.rules.cancel_lead_hours) {
            return Err(BookingError::CancellationWindowExpired {
                min_hours: self.rules.cancel_lead_hours,
                remaining,
            });
        }

        self.release(&booking).await
    }

    // ── Admin operations ──

    /// Cancels any confirmed booking regardless of lead time.
    pub async fn admin_cancel(&self, booking_id: i64) -> Result<BookingDetail, BookingError> {
        let booking = self.load_booking(booking_id).await?;
        ensure_confirmed(&booking)?;
        self.release(&booking).await
    }

    /// Moves a confirmed booking to another available slot in one step.
    pub async fn admin_reschedule(
        &self,
        booking_id: i64,
        new_slot_id: i64,
    ) -> Result<BookingDetail, BookingError> {
        let booking = self.load_booking(booking_id).await?;
        ensure_confirmed(&booking)?;
        if booking.slot_id == new_slot_id {
            return Err(ValidationError::SameSlot.into());
        }

        let target = self.load_slot(new_slot_id).await?;
        if target.status != SlotStatus::Available {
            return Err(BookingError::SlotUnavailable(target.id));
        }
        if self.time.duration_until(target.date, target.start_time) < Duration::zero() {
            return Err(BookingError::SlotInPast(target.id));
        }

        let moved = self
            .store
            .move_booking(booking.id, booking.slot_id, target.id)
            .await;
        if let Err(e) = moved {
            return Err(self.booking_failure(booking.id, e).await);
        }

        tracing::info!(
            "Booking {} rescheduled: slot {} -> {}",
            booking.id,
            booking.slot_id,
            target.id
        );
        self.load_detail(booking.id).await
    }

    /// Flips a slot between available and blocked. Booked slots are refused.
    pub async fn admin_toggle_block(&self, slot_id: i64) -> Result<Slot, BookingError> {
        let slot = self.load_slot(slot_id).await?;
        let (expected, next) = match slot.status {
            SlotStatus::Booked => return Err(BookingError::SlotOccupied(slot.id)),
            SlotStatus::Available => (SlotStatus::Available, SlotStatus::Blocked),
            SlotStatus::Blocked => {
                if self.time.duration_until(slot.date, slot.start_time) < Duration::zero() {
                    return Err(BookingError::SlotInPast(slot.id));
                }
                (SlotStatus::Blocked, SlotStatus::Available)
            }
        };

        let updated = self
            .store
            .set_slot_status(slot.id, expected, next)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(Conflict::SlotState {
                    slot_id,
                    actual: SlotStatus::Booked,
                }) => BookingError::SlotOccupied(slot_id),
                other => other.into(),
            })?;

        tracing::info!(
            "Slot {} toggled {} -> {}",
            slot.id,
            expected.as_str(),
            next.as_str()
        );
        Ok(updated)
    }

    /// Creates the day's slots from `window`, or from the schedule when no
    /// window is given. A closed day yields nothing.
    pub async fn generate_slots(
        &self,
        date: NaiveDate,
        window: Option<DayWindow>,
    ) -> Result<Vec<Slot>, BookingError> {
        if date < self.time.today() {
            return Err(ValidationError::PastDate(date).into());
        }
        let window = match window {
            Some(w) => w,
            None => self.resolve_window(date).await?,
        };
        let drafts = slots::generate(&window)?;
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let created = self.store.insert_slots(date, &drafts).await?;
        tracing::info!("Generated {} slots for {}", created.len(), date);
        Ok(created)
    }

    pub async fn resolve_window(&self, date: NaiveDate) -> Result<DayWindow, BookingError> {
        let templates = self.store.templates().await?;
        Ok(schedule::resolve(date, &templates, &self.defaults))
    }

    /// Marks every confirmed booking whose service has ended as completed.
    /// The slot stays booked. Returns the bookings that were completed.
    pub async fn complete_elapsed(&self) -> Result<Vec<BookingDetail>, BookingError> {
        let now = self.time.now();
        let today = self.time.today();
        let candidates = self
            .store
            .confirmed_between(today - Duration::days(COMPLETION_SCAN_DAYS), today)
            .await?;

        let mut completed = Vec::new();
        for detail in candidates {
            let ends = self.time.at(detail.slot.date, detail.slot.start_time)
                + Duration::minutes(detail.service.duration_minutes);
            if ends > now {
                continue;
            }
            match self.store.complete_booking(detail.id).await {
                Ok(true) => completed.push(BookingDetail {
                    status: BookingStatus::Completed,
                    ..detail
                }),
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to complete booking {}: {}", detail.id, e),
            }
        }

        if !completed.is_empty() {
            tracing::info!("Auto-completed {} past bookings", completed.len());
        }
        Ok(completed)
    }

    // ── Internals ──

    async fn release(&self, booking: &Booking) -> Result<BookingDetail, BookingError> {
        if let Err(e) = self
            .store
            .release_booking(booking.id, booking.slot_id)
            .await
        {
            return Err(self.booking_failure(booking.id, e).await);
        }
        tracing::info!("Booking {} cancelled, slot {} released", booking.id, booking.slot_id);
        self.load_detail(booking.id).await
    }

    /// Turns a store refusal into the most precise reason available, looking
    /// up what the booking became if it changed underneath us.
    async fn booking_failure(&self, booking_id: i64, e: StoreError) -> BookingError {
        if let StoreError::Conflict(Conflict::BookingState { .. }) = e {
            if let Ok(Some(current)) = self.store.booking(booking_id).await {
                return BookingError::BookingNotActive {
                    id: booking_id,
                    status: current.status,
                };
            }
        }
        tracing::warn!("Booking {} change refused: {}", booking_id, e);
        e.into()
    }

    async fn load_booking(&self, id: i64) -> Result<Booking, BookingError> {
        self.store.booking(id).await?.ok_or(BookingError::NotFound {
            entity: "booking",
            id,
        })
    }

    async fn load_slot(&self, id: i64) -> Result<Slot, BookingError> {
        self.store.slot(id).await?.ok_or(BookingError::NotFound {
            entity: "slot",
            id,
        })
    }

    async fn load_detail(&self, id: i64) -> Result<BookingDetail, BookingError> {
        self.store
            .booking_detail(id)
            .await?
            .ok_or(BookingError::NotFound {
                entity: "booking",
                id,
            })
    }
}

fn ensure_confirmed(booking: &Booking) -> Result<(), BookingError> {
    if booking.status.is_terminal() {
        return Err(BookingError::BookingNotActive {
            id: booking.id,
            status: booking.status,
        });
    }
    Ok(())
}

// ── Tests ──
