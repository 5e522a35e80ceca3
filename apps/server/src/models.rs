use chocoo_core::models::BookingStatus;
use chocoo_core::schedule::TemplateInput;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;

// ── Query strings ──

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AdminBookingsQuery {
    pub date: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub month: Option<String>,
}

// ── Request bodies ──

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub service_id: i64,
    pub slot_id: i64,
    pub remind_before_hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub new_slot_id: i64,
}

/// Without `start_time`/`end_time` the day's schedule decides.
#[derive(Debug, Deserialize)]
pub struct GenerateSlotsRequest {
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub interval_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceTemplatesRequest {
    pub templates: Vec<TemplateInput>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub short_description: Option<String>,
    pub description: Option<String>,
    pub duration_minutes: i64,
    pub price: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    pub short_description: Option<String>,
    pub description: Option<String>,
    pub duration_minutes: Option<i64>,
    pub price: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateExpenseRequest {
    pub name: String,
    pub amount: i64,
    pub month: String,
}
