//! Business time: one fixed UTC offset, no daylight-saving transitions.
//!
//! Every date and time of day stored for a slot is business-local. Calendar
//! fields ("today", the current month) are always read from the shifted
//! instant, never from the host timezone.

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use std::sync::{Arc, Mutex};

/// Salon offset from UTC in hours (Minsk, UTC+3).
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 3;

/// Source of the current UTC instant.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct TimePolicy {
    offset: FixedOffset,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TimePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimePolicy")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl TimePolicy {
    /// Returns `None` when `offset_hours` is outside ±23.
    pub fn new(offset_hours: i32, clock: Arc<dyn Clock>) -> Option<Self> {
        let offset = FixedOffset::east_opt(offset_hours.checked_mul(3600)?)?;
        Some(Self { offset, clock })
    }

    /// Wall clock, default salon offset.
    pub fn system() -> Self {
        Self {
            offset: business_offset(DEFAULT_UTC_OFFSET_HOURS),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now_utc().with_timezone(&self.offset)
    }

    /// Business-local wall time, as stored in `created_at` columns.
    pub fn now_naive(&self) -> NaiveDateTime {
        self.now().naive_local()
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// `YYYY-MM` of the business-local date.
    pub fn current_month(&self) -> String {
        self.now().format("%Y-%m").to_string()
    }

    /// The instant `(date, time)` names in business time.
    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> DateTime<FixedOffset> {
        let utc = date.and_time(time) - self.offset_duration();
        self.offset.from_utc_datetime(&utc)
    }

    /// Signed time from now until `(date, time)`; negative once it has passed.
    pub fn duration_until(&self, date: NaiveDate, time: NaiveTime) -> Duration {
        self.duration_until_at(date, time, self.now())
    }

    pub fn duration_until_at(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        as_of: DateTime<FixedOffset>,
    ) -> Duration {
        let target = self.at(date, time);
        Duration::milliseconds((target - as_of).num_milliseconds())
    }

    fn offset_duration(&self) -> Duration {
        Duration::seconds(i64::from(self.offset.local_minus_utc()))
    }
}

fn business_offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or(Utc.fix())
}

// ── Tests ──
