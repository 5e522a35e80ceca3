use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::models::{BookingDetail, BookingStatus, Expense};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyStats {
    pub month: String,
    /// Sum of service prices of bookings completed in the month.
    pub revenue: i64,
    pub expenses: i64,
    pub profit: i64,
    pub completed: usize,
    pub cancelled: usize,
    pub clients: usize,
    pub new_clients: usize,
    pub returning_clients: usize,
}

/// Aggregates one `YYYY-MM` month. `bookings` should hold the full history so
/// first visits can be told apart from returning clients.
pub fn monthly_stats(month: &str, bookings: &[BookingDetail], expenses: &[Expense]) -> MonthlyStats {
    let in_month = |b: &BookingDetail| b.slot.date.format("%Y-%m").to_string() == month;
    let attended = |b: &BookingDetail| b.status != BookingStatus::Cancelled;

    let mut first_month: HashMap<i64, String> = HashMap::new();
    for b in bookings.iter().filter(|b| attended(b)) {
        let m = b.slot.date.format("%Y-%m").to_string();
        first_month
            .entry(b.client.id)
            .and_modify(|prev| {
                if m < *prev {
                    *prev = m.clone();
                }
            })
            .or_insert(m);
    }

    let mut revenue = 0;
    let mut completed = 0;
    let mut cancelled = 0;
    let mut clients = HashSet::new();
    for b in bookings.iter().filter(|b| in_month(b)) {
        match b.status {
            BookingStatus::Completed => {
                revenue += b.service.price;
                completed += 1;
                clients.insert(b.client.id);
            }
            BookingStatus::Confirmed => {
                clients.insert(b.client.id);
            }
            BookingStatus::Cancelled => cancelled += 1,
        }
    }

    let new_clients = clients
        .iter()
        .filter(|id| first_month.get(id).map(String::as_str) == Some(month))
        .count();
    let expenses: i64 = expenses
        .iter()
        .filter(|e| e.month == month)
        .map(|e| e.amount)
        .sum();

    MonthlyStats {
        month: month.to_string(),
        revenue,
        expenses,
        profit: revenue - expenses,
        completed,
        cancelled,
        clients: clients.len(),
        new_clients,
        returning_clients: clients.len() - new_clients,
    }
}

// ── Tests ──
