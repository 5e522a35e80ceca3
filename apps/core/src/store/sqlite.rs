use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{SqliteConnection, SqlitePool};

use super::SchedulingStore;
use crate::error::{Conflict, StoreError};
use crate::models::*;

const SERVICE_COLUMNS: &str =
    "id, name, short_description, description, duration_minutes, price, is_active";
const CLIENT_COLUMNS: &str =
    "id, telegram_id, first_name, username, phone, instagram, consent_given, role";
const BOOKING_COLUMNS: &str =
    "id, client_id, service_id, slot_id, status, remind_before_hours, reminded, created_at";

const DETAIL_SELECT: &str = "SELECT b.id, b.status, b.remind_before_hours, b.reminded, b.created_at,
        u.id AS client_id, u.telegram_id, u.first_name, u.username, u.phone, u.instagram,
        u.consent_given, u.role,
        s.id AS service_id, s.name AS service_name, s.short_description, s.description,
        s.duration_minutes, s.price, s.is_active,
        sl.id AS slot_id, sl.date, sl.start_time, sl.end_time, sl.status AS slot_status
    FROM bookings b
    JOIN users u ON u.id = b.client_id
    JOIN services s ON s.id = b.service_id
    JOIN slots sl ON sl.id = b.slot_id";

/// Flat join row; split into the nested detail by `into_detail`.
#[derive(sqlx::FromRow)]
struct DetailRow {
    id: i64,
    status: BookingStatus,
    remind_before_hours: i64,
    reminded: bool,
    created_at: NaiveDateTime,
    client_id: i64,
    telegram_id: i64,
    first_name: Option<String>,
    username: Option<String>,
    phone: Option<String>,
    instagram: Option<String>,
    consent_given: bool,
    role: Role,
    service_id: i64,
    service_name: String,
    short_description: String,
    description: String,
    duration_minutes: i64,
    price: i64,
    is_active: bool,
    slot_id: i64,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    slot_status: SlotStatus,
}

impl DetailRow {
    fn into_detail(self) -> BookingDetail {
        BookingDetail {
            id: self.id,
            status: self.status,
            remind_before_hours: self.remind_before_hours,
            reminded: self.reminded,
            created_at: self.created_at,
            client: ClientProfile {
                id: self.client_id,
                telegram_id: self.telegram_id,
                first_name: self.first_name,
                username: self.username,
                phone: self.phone,
                instagram: self.instagram,
                consent_given: self.consent_given,
                role: self.role,
            },
            service: Service {
                id: self.service_id,
                name: self.service_name,
                short_description: self.short_description,
                description: self.description,
                duration_minutes: self.duration_minutes,
                price: self.price,
                is_active: self.is_active,
            },
            slot: Slot {
                id: self.slot_id,
                date: self.date,
                start_time: self.start_time,
                end_time: self.end_time,
                status: self.slot_status,
            },
        }
    }
}

/// `sqlx` SQLite store. Each write runs in its own transaction and guards
/// every row it touches with the status it expects.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// All bookings of one client, newest appointment first.
    pub async fn client_bookings(&self, client_id: i64) -> Result<Vec<BookingDetail>, StoreError> {
        let sql = format!(
            "{} WHERE b.client_id = ? ORDER BY sl.date DESC, sl.start_time DESC",
            DETAIL_SELECT
        );
        let rows = sqlx::query_as::<_, DetailRow>(&sql)
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(DetailRow::into_detail).collect())
    }

    /// Admin listing; either filter may be omitted.
    pub async fn bookings_filtered(
        &self,
        date: Option<NaiveDate>,
        status: Option<BookingStatus>,
    ) -> Result<Vec<BookingDetail>, StoreError> {
        let sql = format!(
            "{} WHERE (?1 IS NULL OR sl.date = ?1) AND (?2 IS NULL OR b.status = ?2)
             ORDER BY sl.date, sl.start_time",
            DETAIL_SELECT
        );
        let rows = sqlx::query_as::<_, DetailRow>(&sql)
            .bind(date)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(DetailRow::into_detail).collect())
    }
}

async fn slot_conflict(conn: &mut SqliteConnection, slot_id: i64) -> StoreError {
    let actual: Result<Option<SlotStatus>, sqlx::Error> =
        sqlx::query_scalar("SELECT status FROM slots WHERE id = ?")
            .bind(slot_id)
            .fetch_optional(&mut *conn)
            .await;
    match actual {
        Ok(Some(actual)) => StoreError::Conflict(Conflict::SlotState { slot_id, actual }),
        Ok(None) => StoreError::not_found("slot", slot_id),
        Err(e) => e.into(),
    }
}

async fn booking_conflict(conn: &mut SqliteConnection, booking_id: i64) -> StoreError {
    let exists: Result<bool, sqlx::Error> =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM bookings WHERE id = ?")
            .bind(booking_id)
            .fetch_one(&mut *conn)
            .await;
    match exists {
        Ok(true) => StoreError::Conflict(Conflict::BookingState { booking_id }),
        Ok(false) => StoreError::not_found("booking", booking_id),
        Err(e) => e.into(),
    }
}

/// Conditional status change on one slot; a miss reports what the slot holds now.
async fn swap_slot(
    conn: &mut SqliteConnection,
    slot_id: i64,
    expected: SlotStatus,
    next: SlotStatus,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE slots SET status = ? WHERE id = ? AND status = ?")
        .bind(next)
        .bind(slot_id)
        .bind(expected)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(slot_conflict(conn, slot_id).await);
    }
    Ok(())
}

async fn fetch_booking(conn: &mut SqliteConnection, id: i64) -> Result<Booking, StoreError> {
    let sql = format!("SELECT {} FROM bookings WHERE id = ?", BOOKING_COLUMNS);
    sqlx::query_as::<_, Booking>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::not_found("booking", id))
}

#[async_trait]
impl SchedulingStore for SqliteStore {
    async fn service(&self, id: i64) -> Result<Option<Service>, StoreError> {
        let sql = format!("SELECT {} FROM services WHERE id = ?", SERVICE_COLUMNS);
        Ok(sqlx::query_as::<_, Service>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn client(&self, id: i64) -> Result<Option<ClientProfile>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", CLIENT_COLUMNS);
        Ok(sqlx::query_as::<_, ClientProfile>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn slot(&self, id: i64) -> Result<Option<Slot>, StoreError> {
        Ok(sqlx::query_as::<_, Slot>(
            "SELECT id, date, start_time, end_time, status FROM slots WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn slots_for_date(&self, date: NaiveDate) -> Result<Vec<Slot>, StoreError> {
        Ok(sqlx::query_as::<_, Slot>(
            "SELECT id, date, start_time, end_time, status FROM slots
             WHERE date = ? ORDER BY start_time",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn booking(&self, id: i64) -> Result<Option<Booking>, StoreError> {
        let sql = format!("SELECT {} FROM bookings WHERE id = ?", BOOKING_COLUMNS);
        Ok(sqlx::query_as::<_, Booking>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn booking_detail(&self, id: i64) -> Result<Option<BookingDetail>, StoreError> {
        let sql = format!("{} WHERE b.id = ?", DETAIL_SELECT);
        let row = sqlx::query_as::<_, DetailRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(DetailRow::into_detail))
    }

    async fn confirmed_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BookingDetail>, StoreError> {
        let sql = format!(
            "{} WHERE b.status = 'confirmed' AND sl.date BETWEEN ? AND ?
             ORDER BY sl.date, sl.start_time",
            DETAIL_SELECT
        );
        let rows = sqlx::query_as::<_, DetailRow>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(DetailRow::into_detail).collect())
    }

    async fn templates(&self) -> Result<Vec<ScheduleTemplate>, StoreError> {
        Ok(sqlx::query_as::<_, ScheduleTemplate>(
            "SELECT id, day_of_week, start_time, end_time, interval_minutes, is_active
             FROM schedule_templates ORDER BY day_of_week",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_slots(
        &self,
        date: NaiveDate,
        drafts: &[SlotDraft],
    ) -> Result<Vec<Slot>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM slots WHERE date = ?")
            .bind(date)
            .fetch_one(&mut *tx)
            .await?;
        if existing > 0 {
            return Err(StoreError::AlreadyGenerated(date));
        }

        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let inserted = sqlx::query(
                "INSERT INTO slots (date, start_time, end_time, status) VALUES (?, ?, ?, 'available')",
            )
            .bind(date)
            .bind(draft.start_time)
            .bind(draft.end_time)
            .execute(&mut *tx)
            .await;
            let id = match inserted {
                Ok(r) => r.last_insert_rowid(),
                // A concurrent generator got there first
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    return Err(StoreError::AlreadyGenerated(date));
                }
                Err(e) => return Err(e.into()),
            };
            created.push(Slot {
                id,
                date,
                start_time: draft.start_time,
                end_time: draft.end_time,
                status: SlotStatus::Available,
            });
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn book_slot(&self, draft: &BookingDraft) -> Result<Booking, StoreError> {
        let mut tx = self.pool.begin().await?;

        let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM services WHERE id = ?")
            .bind(draft.service_id)
            .fetch_optional(&mut *tx)
            .await?;
        match active {
            None => return Err(StoreError::not_found("service", draft.service_id)),
            Some(false) => {
                return Err(StoreError::Conflict(Conflict::ServiceInactive {
                    service_id: draft.service_id,
                }))
            }
            Some(true) => {}
        }

        swap_slot(&mut tx, draft.slot_id, SlotStatus::Available, SlotStatus::Booked).await?;

        let id = sqlx::query(
            "INSERT INTO bookings
                (client_id, service_id, slot_id, status, remind_before_hours, reminded, created_at)
             VALUES (?, ?, ?, 'confirmed', ?, 0, ?)",
        )
        .bind(draft.client_id)
        .bind(draft.service_id)
        .bind(draft.slot_id)
        .bind(draft.remind_before_hours)
        .bind(draft.created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        Ok(Booking {
            id,
            client_id: draft.client_id,
            service_id: draft.service_id,
            slot_id: draft.slot_id,
            status: BookingStatus::Confirmed,
            remind_before_hours: draft.remind_before_hours,
            reminded: false,
            created_at: draft.created_at,
        })
    }

    async fn release_booking(&self, booking_id: i64, slot_id: i64) -> Result<Booking, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE bookings SET status = 'cancelled'
             WHERE id = ? AND slot_id = ? AND status = 'confirmed'",
        )
        .bind(booking_id)
        .bind(slot_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(booking_conflict(&mut tx, booking_id).await);
        }

        swap_slot(&mut tx, slot_id, SlotStatus::Booked, SlotStatus::Available).await?;

        let booking = fetch_booking(&mut tx, booking_id).await?;
        tx.commit().await?;
        Ok(booking)
    }

    async fn move_booking(
        &self,
        booking_id: i64,
        from_slot: i64,
        to_slot: i64,
    ) -> Result<Booking, StoreError> {
        let mut tx = self.pool.begin().await?;

        let on_slot: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM bookings WHERE id = ? AND slot_id = ? AND status = 'confirmed'",
        )
        .bind(booking_id)
        .bind(from_slot)
        .fetch_one(&mut *tx)
        .await?;
        if !on_slot {
            return Err(booking_conflict(&mut tx, booking_id).await);
        }

        swap_slot(&mut tx, to_slot, SlotStatus::Available, SlotStatus::Booked).await?;
        swap_slot(&mut tx, from_slot, SlotStatus::Booked, SlotStatus::Available).await?;

        sqlx::query("UPDATE bookings SET slot_id = ? WHERE id = ?")
            .bind(to_slot)
            .bind(booking_id)
            .execute(&mut *tx)
            .await?;

        let booking = fetch_booking(&mut tx, booking_id).await?;
        tx.commit().await?;
        Ok(booking)
    }

    async fn set_slot_status(
        &self,
        slot_id: i64,
        expected: SlotStatus,
        next: SlotStatus,
    ) -> Result<Slot, StoreError> {
        let mut tx = self.pool.begin().await?;
        swap_slot(&mut tx, slot_id, expected, next).await?;
        let slot = sqlx::query_as::<_, Slot>(
            "SELECT id, date, start_time, end_time, status FROM slots WHERE id = ?",
        )
        .bind(slot_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(slot)
    }

    async fn complete_booking(&self, booking_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE bookings SET status = 'completed' WHERE id = ? AND status = 'confirmed'",
        )
        .bind(booking_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.booking(booking_id)
            .await?
            .map(|_| false)
            .ok_or_else(|| StoreError::not_found("booking", booking_id))
    }

    async fn mark_reminded(&self, booking_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE bookings SET reminded = 1
             WHERE id = ? AND status = 'confirmed' AND reminded = 0",
        )
        .bind(booking_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.booking(booking_id)
            .await?
            .map(|_| false)
            .ok_or_else(|| StoreError::not_found("booking", booking_id))
    }
}

// ── Tests ──
