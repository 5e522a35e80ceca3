//! Time-driven work run by the bot's scheduler loop: reminders, daily slot
//! generation and the admins' morning summary. Completion lives on
//! [`BookingLifecycle::complete_elapsed`].

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Timelike};

use crate::error::BookingError;
use crate::lifecycle::BookingLifecycle;
use crate::models::{BookingDetail, Role};

pub const AUTO_GENERATE_DAYS_AHEAD: i64 = 14;
/// Telegram caps messages at 4096 characters.
pub const MESSAGE_LIMIT: usize = 4000;

/// Fires once per business day inside a short window after `at`.
#[derive(Debug, Clone)]
pub struct DailyTrigger {
    at: NaiveTime,
    window: Duration,
    last_run: Option<NaiveDate>,
}

impl DailyTrigger {
    pub fn new(at: NaiveTime) -> Self {
        Self {
            at,
            window: Duration::minutes(2),
            last_run: None,
        }
    }

    /// After a restart past the window, today's run counts as done.
    pub fn started_at(mut self, now: DateTime<FixedOffset>) -> Self {
        if now.time() >= self.at + self.window {
            self.last_run = Some(now.date_naive());
        }
        self
    }

    pub fn is_due(&self, now: DateTime<FixedOffset>) -> bool {
        let time = now.time();
        self.last_run != Some(now.date_naive()) && time >= self.at && time < self.at + self.window
    }

    pub fn mark_done(&mut self, now: DateTime<FixedOffset>) {
        self.last_run = Some(now.date_naive());
    }
}

/// Confirmed bookings whose reminder is due, each claimed exactly once.
///
/// The reminded flag is set before the caller sends anything, so a crash
/// after claiming loses a reminder rather than sending it twice.
pub async fn claim_due_reminders(
    lifecycle: &BookingLifecycle,
) -> Result<Vec<BookingDetail>, BookingError> {
    let time = lifecycle.time();
    let today = time.today();
    let candidates = lifecycle
        .store()
        .confirmed_between(today, today + Duration::days(1))
        .await?;

    let mut due = Vec::new();
    for detail in candidates {
        if detail.reminded {
            continue;
        }
        let until = time.duration_until(detail.slot.date, detail.slot.start_time);
        if until <= Duration::zero() || until > Duration::hours(detail.remind_before_hours) {
            continue;
        }
        match lifecycle.store().mark_reminded(detail.id).await {
            Ok(true) => due.push(detail),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to claim reminder for booking {}: {}", detail.id, e),
        }
    }
    Ok(due)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub slots_created: usize,
    pub days_generated: Vec<NaiveDate>,
}

/// Fills the next [`AUTO_GENERATE_DAYS_AHEAD`] days starting today. Closed
/// days and dates that already have slots are skipped.
pub async fn auto_generate(lifecycle: &BookingLifecycle) -> Result<GenerationReport, BookingError> {
    let today = lifecycle.time().today();
    let mut report = GenerationReport::default();

    for offset in 0..AUTO_GENERATE_DAYS_AHEAD {
        let date = today + Duration::days(offset);
        match lifecycle.generate_slots(date, None).await {
            Ok(created) if created.is_empty() => {}
            Ok(created) => {
                report.slots_created += created.len();
                report.days_generated.push(date);
            }
            Err(BookingError::AlreadyGenerated(_)) => {}
            Err(e) => return Err(e),
        }
    }

    if report.slots_created > 0 {
        tracing::info!(
            "Auto-generated {} slots for next {} days",
            report.slots_created,
            AUTO_GENERATE_DAYS_AHEAD
        );
    }
    Ok(report)
}

/// Today's client bookings as one or more messages, each under [`MESSAGE_LIMIT`].
pub async fn morning_summary(lifecycle: &BookingLifecycle) -> Result<Vec<String>, BookingError> {
    let today = lifecycle.time().today();
    let bookings: Vec<BookingDetail> = lifecycle
        .store()
        .confirmed_between(today, today)
        .await?
        .into_iter()
        .filter(|b| b.client.role != Role::Admin)
        .collect();
    Ok(format_summary(today, &bookings))
}

pub fn format_summary(date: NaiveDate, bookings: &[BookingDetail]) -> Vec<String> {
    let day = date.format("%d.%m.%Y");
    if bookings.is_empty() {
        return vec![format!("☀️ Доброе утро!\n\nНа сегодня ({}) записей нет.", day)];
    }

    let footer = format!("\nВсего: {}", bookings.len());
    let mut messages = Vec::new();
    let mut current = format!("☀️ Доброе утро!\n\nЗаписи на сегодня ({}):\n", day);

    for (i, b) in bookings.iter().enumerate() {
        let line = format!(
            "{}. {} — {}, {}",
            i + 1,
            b.slot.start_time.format("%H:%M"),
            b.client.display_name(),
            b.service.name
        );
        if char_len(&current) + char_len(&line) + char_len(&footer) + 1 > MESSAGE_LIMIT {
            messages.push(current.trim_end().to_string());
            current = String::new();
        }
        current.push_str(&line);
        current.push('\n');
    }
    current.push_str(&footer);
    messages.push(current);
    messages
}

/// The reminder text a client receives.
pub fn reminder_text(detail: &BookingDetail, address: Option<&str>) -> String {
    let mut text = format!(
        "⏰ Напоминание!\n\nУ вас запись {}:\nУслуга: {}\nВремя: {}",
        detail.slot.date.format("%d.%m.%Y"),
        detail.service.name,
        detail.slot.start_time.format("%H:%M")
    );
    if let Some(address) = address.filter(|a| !a.is_empty()) {
        text.push_str(&format!("\n\nАдрес: {}", address));
    }
    text.push_str("\n\nЖдём вас!");
    text
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Whole-hour time of day for trigger configuration.
pub fn at_hour(hour: u32) -> NaiveTime {
    NaiveTime::MIN.with_hour(hour).unwrap_or(NaiveTime::MIN)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::BookingRequest;
    use crate::models::*;
    use crate::schedule::{hm, DayWindow};
    use crate::store::{MemoryStore, SchedulingStore};
    use crate::time::{FixedClock, TimePolicy};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn local(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap() - Duration::hours(3)
    }

    fn setup(now: DateTime<Utc>) -> (Arc<MemoryStore>, Arc<FixedClock>, BookingLifecycle) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(now));
        let time = TimePolicy::new(3, clock.clone()).unwrap();
        (store.clone(), clock, BookingLifecycle::new(store, time))
    }

    fn make_detail(n: usize, name: &str) -> BookingDetail {
        BookingDetail {
            id: n as i64,
            status: BookingStatus::Confirmed,
            remind_before_hours: 2,
            reminded: false,
            created_at: day().and_time(hm(8, 0)),
            client: ClientProfile {
                id: 1,
                telegram_id: 1,
                first_name: Some(name.to_string()),
                username: None,
                phone: None,
                instagram: None,
                consent_given: true,
                role: Role::Client,
            },
            service: Service {
                id: 1,
                name: "Чистка лица".into(),
                short_description: String::new(),
                description: String::new(),
                duration_minutes: 60,
                price: 90,
                is_active: true,
            },
            slot: Slot {
                id: n as i64,
                date: day(),
                start_time: hm(10, 0),
                end_time: hm(10, 30),
                status: SlotStatus::Booked,
            },
        }
    }

    async fn book(store: &MemoryStore, lifecycle: &BookingLifecycle, slot: &Slot, hours: i64) -> i64 {
        let client = store.add_client(ClientProfile {
            id: 0,
            telegram_id: 100 + slot.id,
            first_name: Some("Анна".into()),
            username: None,
            phone: Some("+375291234567".into()),
            instagram: None,
            consent_given: true,
            role: Role::Client,
        });
        let service = store.add_service(make_detail(0, "x").service);
        lifecycle
            .create(&BookingRequest {
                client_id: client.id,
                service_id: service.id,
                slot_id: slot.id,
                remind_before_hours: Some(hours),
            })
            .await
            .unwrap()
            .id
    }

    #[test]
    fn test_trigger_fires_once_in_window() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let at = |h, m| offset.from_utc_datetime(&local(h, m).naive_utc());
        let mut trigger = DailyTrigger::new(at_hour(7));

        assert!(!trigger.is_due(at(6, 59)));
        assert!(trigger.is_due(at(7, 0)));
        trigger.mark_done(at(7, 0));
        assert!(!trigger.is_due(at(7, 1)));
        assert!(trigger.is_due(at(7, 0) + Duration::days(1)));
    }

    #[test]
    fn test_trigger_skips_today_after_late_start() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let late = offset.from_utc_datetime(&local(9, 0).naive_utc());
        let trigger = DailyTrigger::new(at_hour(8)).started_at(late);
        assert!(!trigger.is_due(late - Duration::minutes(60)));
    }

    #[tokio::test]
    async fn test_reminder_claimed_once_inside_lead_time() {
        let (store, clock, lifecycle) = setup(local(6, 0));
        let slots = lifecycle
            .generate_slots(day(), Some(DayWindow::open(hm(12, 0), hm(13, 0), 30)))
            .await
            .unwrap();
        let id = book(&store, &lifecycle, &slots[0], 2).await;

        // 3h before: not yet
        clock.set(local(9, 0));
        assert!(claim_due_reminders(&lifecycle).await.unwrap().is_empty());

        clock.set(local(10, 0));
        let due = claim_due_reminders(&lifecycle).await.unwrap();
        assert_eq!(due.iter().map(|d| d.id).collect::<Vec<_>>(), vec![id]);

        clock.set(local(10, 30));
        assert!(claim_due_reminders(&lifecycle).await.unwrap().is_empty());
        assert!(store.booking(id).await.unwrap().unwrap().reminded);
    }

    #[tokio::test]
    async fn test_reminder_not_sent_after_start() {
        let (store, clock, lifecycle) = setup(local(6, 0));
        let slots = lifecycle
            .generate_slots(day(), Some(DayWindow::open(hm(12, 0), hm(13, 0), 30)))
            .await
            .unwrap();
        book(&store, &lifecycle, &slots[0], 1).await;

        clock.set(local(12, 5));
        assert!(claim_due_reminders(&lifecycle).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auto_generate_skips_closed_and_existing() {
        let (store, _, lifecycle) = setup(local(7, 0));
        lifecycle
            .generate_slots(day(), Some(DayWindow::open(hm(10, 0), hm(11, 0), 30)))
            .await
            .unwrap();

        let report = auto_generate(&lifecycle).await.unwrap();
        // Monday already existed; two Sundays fall inside the 14 days
        assert_eq!(report.days_generated.len(), 11);
        assert!(!report.days_generated.contains(&day()));
        assert_eq!(store.slots_for_date(day()).await.unwrap().len(), 2);

        let again = auto_generate(&lifecycle).await.unwrap();
        assert_eq!(again, GenerationReport::default());
    }

    #[test]
    fn test_summary_empty_day() {
        let messages = format_summary(day(), &[]);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("записей нет"));
    }

    #[test]
    fn test_summary_lists_bookings_with_total() {
        let bookings = vec![make_detail(1, "Анна"), make_detail(2, "Мария")];
        let messages = format_summary(day(), &bookings);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("1. 10:00 — Анна, Чистка лица"));
        assert!(messages[0].ends_with("Всего: 2"));
    }

    #[test]
    fn test_summary_splits_long_days() {
        let long_name = "Я".repeat(300);
        let bookings: Vec<_> = (1..=30).map(|i| make_detail(i, &long_name)).collect();
        let messages = format_summary(day(), &bookings);
        assert!(messages.len() > 1);
        for m in &messages {
            assert!(m.chars().count() <= MESSAGE_LIMIT);
        }
        assert!(messages.last().unwrap().ends_with("Всего: 30"));
    }

    #[test]
    fn test_reminder_text_includes_address() {
        let text = reminder_text(&make_detail(1, "Анна"), Some("ул. Немига, 5"));
        assert!(text.contains("Время: 10:00"));
        assert!(text.contains("Адрес: ул. Немига, 5"));
        assert!(!reminder_text(&make_detail(1, "Анна"), Some("")).contains("Адрес"));
    }
}
