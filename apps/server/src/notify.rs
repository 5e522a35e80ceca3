//! Telegram messages about booking changes.
//!
//! Sends are fire-and-forget: a failed delivery is logged and never fails
//! the request that triggered it.

use chocoo_core::models::{BookingDetail, Slot};

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct Notifier {
    bot_token: String,
    /// `None` disables delivery (tests, local runs without a bot).
    api_base: Option<String>,
    admin_ids: Vec<i64>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(bot_token: String, admin_ids: Vec<i64>) -> Self {
        Self {
            bot_token,
            api_base: Some(TELEGRAM_API.to_string()),
            admin_ids,
            http: reqwest::Client::new(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            bot_token: String::new(),
            api_base: None,
            admin_ids: Vec::new(),
            http: reqwest::Client::new(),
        }
    }

    pub fn booking_created(&self, detail: &BookingDetail) {
        self.to_admins(new_booking_text(detail));
    }

    pub fn booking_cancelled_by_client(&self, detail: &BookingDetail) {
        self.to_admins(client_cancel_text(detail));
    }

    pub fn booking_cancelled_by_admin(&self, detail: &BookingDetail) {
        self.send(detail.client.telegram_id, admin_cancel_text(detail));
    }

    pub fn booking_rescheduled(&self, detail: &BookingDetail, previous: &Slot) {
        self.send(detail.client.telegram_id, reschedule_text(detail, previous));
    }

    fn to_admins(&self, text: String) {
        for &admin in &self.admin_ids {
            self.send(admin, text.clone());
        }
    }

    fn send(&self, chat_id: i64, text: String) {
        let Some(base) = &self.api_base else {
            tracing::debug!("Notification to {} skipped (disabled)", chat_id);
            return;
        };
        let url = format!("{}/bot{}/sendMessage", base, self.bot_token);
        let http = self.http.clone();
        tokio::spawn(async move {
            let result = http
                .post(&url)
                .json(&serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML"
                }))
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = result {
                tracing::error!("Failed to notify {}: {}", chat_id, e);
            }
        });
    }
}

fn when(slot: &Slot) -> String {
    format!(
        "{} в {}",
        slot.date.format("%d.%m.%Y"),
        slot.start_time.format("%H:%M")
    )
}

pub fn new_booking_text(detail: &BookingDetail) -> String {
    let mut text = format!(
        "📅 <b>Новая запись</b>\n\n👤 {}\n💆 {}\n🕐 {}",
        detail.client.display_name(),
        detail.service.name,
        when(&detail.slot)
    );
    if let Some(phone) = &detail.client.phone {
        text.push_str(&format!("\n📞 {}", phone));
    }
    text
}

pub fn client_cancel_text(detail: &BookingDetail) -> String {
    format!(
        "❌ <b>Клиент отменил запись</b>\n\n👤 {}\n💆 {}\n🕐 {}",
        detail.client.display_name(),
        detail.service.name,
        when(&detail.slot)
    )
}

pub fn admin_cancel_text(detail: &BookingDetail) -> String {
    format!(
        "❌ Ваша запись на «{}» {} отменена мастером.\nВыберите другое время в приложении.",
        detail.service.name,
        when(&detail.slot)
    )
}

pub fn reschedule_text(detail: &BookingDetail, previous: &Slot) -> String {
    format!(
        "🔄 Ваша запись на «{}» перенесена.\nБыло: {}\nСтало: {}",
        detail.service.name,
        when(previous),
        when(&detail.slot)
    )
}

// ── Tests ──
