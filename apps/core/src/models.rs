use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

// ── Status enums ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::Type))]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "sqlite", sqlx(rename_all = "lowercase"))]
pub enum SlotStatus {
    Available,
    Booked,
    Blocked,
}

impl SlotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
            SlotStatus::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::Type))]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "sqlite", sqlx(rename_all = "lowercase"))]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    /// Cancelled and completed bookings never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, BookingStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::Type))]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "sqlite", sqlx(rename_all = "lowercase"))]
pub enum Role {
    Client,
    Admin,
}

// ── Database models ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::FromRow))]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub short_description: String,
    pub description: String,
    pub duration_minutes: i64,
    pub price: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::FromRow))]
pub struct ScheduleTemplate {
    pub id: i64,
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: i64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub interval_minutes: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::FromRow))]
pub struct Slot {
    pub id: i64,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::FromRow))]
pub struct Booking {
    pub id: i64,
    pub client_id: i64,
    pub service_id: i64,
    pub slot_id: i64,
    pub status: BookingStatus,
    pub remind_before_hours: i64,
    pub reminded: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::FromRow))]
pub struct ClientProfile {
    pub id: i64,
    pub telegram_id: i64,
    pub first_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub instagram: Option<String>,
    pub consent_given: bool,
    pub role: Role,
}

impl ClientProfile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Name shown to the master in notifications and summaries.
    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.username.as_ref().map(|u| format!("@{}", u)))
            .unwrap_or_else(|| self.telegram_id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::FromRow))]
pub struct Expense {
    pub id: i64,
    pub name: String,
    pub amount: i64,
    /// `YYYY-MM`
    pub month: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::FromRow))]
pub struct SalonProfile {
    pub name: String,
    pub description: String,
    pub address: String,
    pub phone: String,
    pub working_hours_text: String,
    pub instagram: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::FromRow))]
pub struct FaqItem {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub order_index: i64,
}

/// A booking with everything it is bound to, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingDetail {
    pub id: i64,
    pub status: BookingStatus,
    pub remind_before_hours: i64,
    pub reminded: bool,
    pub created_at: NaiveDateTime,
    pub client: ClientProfile,
    pub service: Service,
    pub slot: Slot,
}

/// Free/total slot counts for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlite", derive(sqlx::FromRow))]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub total: i64,
    pub free: i64,
}

// ── Drafts handed to the store ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDraft {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingDraft {
    pub client_id: i64,
    pub service_id: i64,
    pub slot_id: i64,
    pub remind_before_hours: i64,
    pub created_at: NaiveDateTime,
}

// ── API envelope ──

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
