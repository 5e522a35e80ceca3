use chocoo_core::models::{BookingDetail, BookingStatus};
use chocoo_core::BookingError;
use chrono::NaiveDate;

const MONTHS: [&str; 12] = [
    "января", "февраля", "марта", "апреля", "мая", "июня", "июля", "августа", "сентября",
    "октября", "ноября", "декабря",
];

/// `2025-06-02` → `2 июня`
pub fn format_date_ru(date: NaiveDate) -> String {
    use chrono::Datelike;
    format!("{} {}", date.day(), MONTHS[date.month0() as usize])
}

/// Inline button payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Cancel(i64),
    AdminCancel(i64),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(id) = data.strip_prefix("cancel:") {
            return id.parse().ok().map(CallbackAction::Cancel);
        }
        if let Some(id) = data.strip_prefix("admin_cancel:") {
            return id.parse().ok().map(CallbackAction::AdminCancel);
        }
        None
    }

    pub fn data(self) -> String {
        match self {
            CallbackAction::Cancel(id) => format!("cancel:{}", id),
            CallbackAction::AdminCancel(id) => format!("admin_cancel:{}", id),
        }
    }
}

/// Client's own upcoming bookings.
pub fn my_bookings_text(bookings: &[BookingDetail]) -> String {
    let mut text = "📋 <b>Ваши записи:</b>\n\n".to_string();
    for b in bookings {
        text.push_str(&format!(
            "💆 <b>{}</b>\n📅 {} · {}\n💰 {} BYN\n\n",
            b.service.name,
            format_date_ru(b.slot.date),
            b.slot.start_time.format("%H:%M"),
            b.service.price,
        ));
    }
    text
}

/// One day's confirmed bookings for the master, with a total.
pub fn day_bookings_text(label: &str, date: NaiveDate, bookings: &[BookingDetail]) -> String {
    if bookings.is_empty() {
        return format!("☀️ {} ({}) — записей нет", label, format_date_ru(date));
    }

    let mut text = format!("📋 <b>{}</b> ({})\n\n", label, format_date_ru(date));
    for (i, b) in bookings.iter().enumerate() {
        let mut line = format!(
            "{}. <b>{}</b> · {}\n   👤 {}",
            i + 1,
            b.slot.start_time.format("%H:%M"),
            b.service.name,
            b.client.display_name(),
        );
        if let Some(phone) = &b.client.phone {
            line.push_str(&format!(" · {}", phone));
        }
        text.push_str(&line);
        text.push_str("\n\n");
    }

    let total: i64 = bookings.iter().map(|b| b.service.price).sum();
    text.push_str(&format!(
        "━━━━━━━━━━━━━\n📊 Всего записей: <b>{}</b>\n💰 Итого: <b>{} BYN</b>",
        bookings.len(),
        total
    ));
    text
}

pub fn client_cancelled_text(b: &BookingDetail) -> String {
    format!(
        "❌ Клиент отменил запись\n\n👤 {}\n💆 {}\n📅 {} в {}",
        b.client.display_name(),
        b.service.name,
        format_date_ru(b.slot.date),
        b.slot.start_time.format("%H:%M"),
    )
}

pub fn admin_cancelled_text(b: &BookingDetail) -> String {
    format!(
        "😔 Ваша запись на {} в {} отменена мастером.\n\nВыберите другое время в приложении.",
        format_date_ru(b.slot.date),
        b.slot.start_time.format("%H:%M"),
    )
}

/// Short reason shown in the callback toast when a cancel is refused.
pub fn refusal_text(e: &BookingError) -> String {
    match e {
        BookingError::CancellationWindowExpired { min_hours, .. } => format!(
            "Отменить можно не позднее чем за {} часов. Напишите мастеру",
            min_hours
        ),
        BookingError::BookingNotActive {
            status: BookingStatus::Completed,
            ..
        } => "Запись уже завершена".into(),
        BookingError::BookingNotActive { .. } => "Запись уже отменена".into(),
        BookingError::NotFound { .. } => "Запись не найдена".into(),
        _ => "Не удалось отменить запись, попробуйте позже".into(),
    }
}

// ── Tests ──
