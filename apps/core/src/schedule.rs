//! Operating hours per weekday.

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ValidationError;
use crate::models::ScheduleTemplate;

/// Slot length used when neither a template nor the request names one.
pub const DEFAULT_INTERVAL_MINUTES: i64 = 30;

/// What a date resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DayWindow {
    Open {
        start: NaiveTime,
        end: NaiveTime,
        interval_minutes: i64,
    },
    Closed,
}

impl DayWindow {
    pub fn open(start: NaiveTime, end: NaiveTime, interval_minutes: i64) -> Self {
        DayWindow::Open {
            start,
            end,
            interval_minutes,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, DayWindow::Closed)
    }
}

/// Fallback windows indexed by weekday, Sunday = 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDefaults {
    pub by_weekday: [DayWindow; 7],
}

impl Default for ScheduleDefaults {
    /// Weekdays 08:30–21:00, Saturday 08:30–16:00, Sunday off.
    fn default() -> Self {
        let weekday = DayWindow::open(hm(8, 30), hm(21, 0), DEFAULT_INTERVAL_MINUTES);
        let saturday = DayWindow::open(hm(8, 30), hm(16, 0), DEFAULT_INTERVAL_MINUTES);
        Self {
            by_weekday: [
                DayWindow::Closed,
                weekday,
                weekday,
                weekday,
                weekday,
                weekday,
                saturday,
            ],
        }
    }
}

/// Sunday = 0 … Saturday = 6, from the date's own calendar fields.
pub fn day_of_week(date: NaiveDate) -> i64 {
    i64::from(date.weekday().num_days_from_sunday())
}

/// An active template for the weekday wins, otherwise the default window.
pub fn resolve(
    date: NaiveDate,
    templates: &[ScheduleTemplate],
    defaults: &ScheduleDefaults,
) -> DayWindow {
    let dow = day_of_week(date);
    templates
        .iter()
        .find(|t| t.is_active && t.day_of_week == dow)
        .map(|t| DayWindow::open(t.start_time, t.end_time, t.interval_minutes))
        .unwrap_or(defaults.by_weekday[dow as usize])
}

/// One weekday row of a bulk template replacement.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateInput {
    pub day_of_week: i64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub interval_minutes: i64,
    pub is_active: bool,
}

/// Each weekday at most once, each window non-empty.
pub fn validate_templates(templates: &[TemplateInput]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for t in templates {
        if !(0..=6).contains(&t.day_of_week) {
            return Err(ValidationError::InvalidWeekday);
        }
        if !seen.insert(t.day_of_week) {
            return Err(ValidationError::DuplicateWeekday(t.day_of_week));
        }
        if t.interval_minutes <= 0 {
            return Err(ValidationError::NonPositiveInterval);
        }
        if t.end_time <= t.start_time {
            return Err(ValidationError::EmptyWindow);
        }
    }
    Ok(())
}

pub(crate) fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

// ── Tests ──
