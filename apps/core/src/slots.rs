//! Slot generation and the read-side helpers built on top of slot lists.

use chrono::{Duration, NaiveDate, NaiveTime, Timelike};

use crate::error::ValidationError;
use crate::models::{Slot, SlotDraft, SlotStatus};
use crate::schedule::DayWindow;

/// Nothing may end later than this.
const LAST_MINUTE_OF_DAY: i64 = 23 * 60 + 59;

/// Clients don't see today's slots that start sooner than this.
pub const CLIENT_VISIBILITY_CUTOFF_MINUTES: i64 = 30;

/// Consecutive `interval`-minute slots from `start` that fit entirely before `end`.
///
/// A closed day yields no slots.
pub fn generate(window: &DayWindow) -> Result<Vec<SlotDraft>, ValidationError> {
    let (start, end, interval) = match *window {
        DayWindow::Closed => return Ok(Vec::new()),
        DayWindow::Open {
            start,
            end,
            interval_minutes,
        } => (start, end, interval_minutes),
    };
    if interval <= 0 {
        return Err(ValidationError::NonPositiveInterval);
    }
    if end <= start {
        return Err(ValidationError::EmptyWindow);
    }

    let end_minutes = minutes_of_day(end).min(LAST_MINUTE_OF_DAY);
    let mut current = minutes_of_day(start);
    let mut drafts = Vec::new();

    while current + interval <= end_minutes {
        let slot_end = current + interval;
        drafts.push(SlotDraft {
            start_time: from_minutes(current),
            end_time: from_minutes(slot_end),
        });
        current = slot_end;
    }

    Ok(drafts)
}

/// Slots a client may still pick: available, and for today not about to start.
pub fn visible_to_client(
    slots: Vec<Slot>,
    date: NaiveDate,
    today: NaiveDate,
    now: NaiveTime,
) -> Vec<Slot> {
    let cutoff = now + Duration::minutes(CLIENT_VISIBILITY_CUTOFF_MINUTES);
    // Past midnight the cutoff wraps; nothing today is left to show then.
    let wrapped = cutoff < now;
    slots
        .into_iter()
        .filter(|s| s.status == SlotStatus::Available)
        .filter(|s| date != today || (!wrapped && s.start_time >= cutoff))
        .collect()
}

fn minutes_of_day(t: NaiveTime) -> i64 {
    i64::from(t.hour()) * 60 + i64::from(t.minute())
}

fn from_minutes(m: i64) -> NaiveTime {
    NaiveTime::from_hms_opt((m / 60) as u32, (m % 60) as u32, 0).unwrap_or(NaiveTime::MIN)
}

// ── Tests ──
