use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use chocoo_core::models::*;
use chocoo_core::schedule::{self, DayWindow, DEFAULT_INTERVAL_MINUTES};
use chocoo_core::stats::{self, MonthlyStats};
use chocoo_core::validation::{validate_amount, validate_month};
use chocoo_core::{SchedulingStore, ValidationError};

use crate::auth::{self, TelegramUser};
use crate::error::{api_error, booking_error, db_error, store_error, validation_error, ApiError};
use crate::handlers::client::extract_user;
use crate::models::*;
use crate::AppState;

const SERVICE_SELECT: &str =
    "SELECT id, name, short_description, description, duration_minutes, price, is_active
     FROM services";

/// Helper: extract admin user (validates both auth and admin status)
fn extract_admin(headers: &HeaderMap, state: &AppState) -> Result<TelegramUser, ApiError> {
    let user = extract_user(headers, &state.bot_token)?;
    if !auth::is_admin(&user, &state.admin_tg_ids) {
        return Err(api_error(StatusCode::FORBIDDEN, "Доступ запрещён"));
    }
    Ok(user)
}

// ── Bookings ──

/// GET /api/admin/bookings?date=&status=
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminBookingsQuery>,
) -> Result<Json<ApiResponse<Vec<BookingDetail>>>, ApiError> {
    extract_admin(&headers, &state)?;

    let bookings = state
        .store
        .bookings_filtered(query.date, query.status)
        .await
        .map_err(|e| store_error("admin list_bookings", e))?;

    Ok(Json(ApiResponse::success(bookings)))
}

/// PATCH /api/admin/bookings/{id}/cancel — no lead-time limit for the master.
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<i64>,
) -> Result<Json<ApiResponse<BookingDetail>>, ApiError> {
    let admin = extract_admin(&headers, &state)?;

    let detail = state
        .lifecycle
        .admin_cancel(booking_id)
        .await
        .map_err(|e| booking_error("admin cancel_booking", e))?;

    tracing::info!("Admin {} cancelled booking {}", admin.id, booking_id);
    state.notifier.booking_cancelled_by_admin(&detail);
    Ok(Json(ApiResponse::success(detail)))
}

/// PATCH /api/admin/bookings/{id}/reschedule
pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<i64>,
    Json(body): Json<RescheduleRequest>,
) -> Result<Json<ApiResponse<BookingDetail>>, ApiError> {
    let admin = extract_admin(&headers, &state)?;

    let previous = state
        .store
        .booking_detail(booking_id)
        .await
        .map_err(|e| store_error("admin reschedule_booking", e))?
        .map(|d| d.slot);

    let detail = state
        .lifecycle
        .admin_reschedule(booking_id, body.new_slot_id)
        .await
        .map_err(|e| booking_error("admin reschedule_booking", e))?;

    tracing::info!(
        "Admin {} moved booking {} to slot {}",
        admin.id,
        booking_id,
        body.new_slot_id
    );
    if let Some(previous) = previous {
        state.notifier.booking_rescheduled(&detail, &previous);
    }
    Ok(Json(ApiResponse::success(detail)))
}

// ── Slots ──

/// GET /api/admin/slots?date= — every slot of the day, any status.
pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<ApiResponse<Vec<Slot>>>, ApiError> {
    extract_admin(&headers, &state)?;

    let slots = state
        .store
        .slots_for_date(query.date)
        .await
        .map_err(|e| store_error("admin list_slots", e))?;

    Ok(Json(ApiResponse::success(slots)))
}

/// PATCH /api/admin/slots/{id}/toggle — available ⇄ blocked.
pub async fn toggle_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slot_id): Path<i64>,
) -> Result<Json<ApiResponse<Slot>>, ApiError> {
    extract_admin(&headers, &state)?;

    let slot = state
        .lifecycle
        .admin_toggle_block(slot_id)
        .await
        .map_err(|e| booking_error("admin toggle_slot", e))?;

    Ok(Json(ApiResponse::success(slot)))
}

/// POST /api/admin/slots/generate
pub async fn generate_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GenerateSlotsRequest>,
) -> Result<Json<ApiResponse<Vec<Slot>>>, ApiError> {
    extract_admin(&headers, &state)?;

    let window = match (body.start_time, body.end_time) {
        (Some(start), Some(end)) => Some(DayWindow::open(
            start,
            end,
            body.interval_minutes.unwrap_or(DEFAULT_INTERVAL_MINUTES),
        )),
        (None, None) => None,
        _ => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "Укажите и время начала, и время окончания",
            ))
        }
    };

    let slots = state
        .lifecycle
        .generate_slots(body.date, window)
        .await
        .map_err(|e| booking_error("admin generate_slots", e))?;

    Ok(Json(ApiResponse::success(slots)))
}

// ── Schedule templates ──

/// GET /api/admin/schedule-templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<ScheduleTemplate>>>, ApiError> {
    extract_admin(&headers, &state)?;

    let templates = state
        .store
        .templates()
        .await
        .map_err(|e| store_error("admin list_templates", e))?;

    Ok(Json(ApiResponse::success(templates)))
}

/// PUT /api/admin/schedule-templates — replaces the whole week at once.
/// Weekdays left out fall back to the default hours.
pub async fn replace_templates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ReplaceTemplatesRequest>,
) -> Result<Json<ApiResponse<Vec<ScheduleTemplate>>>, ApiError> {
    extract_admin(&headers, &state)?;
    schedule::validate_templates(&body.templates).map_err(validation_error)?;

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| db_error("replace_templates", e))?;
    sqlx::query("DELETE FROM schedule_templates")
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("replace_templates", e))?;
    for t in &body.templates {
        sqlx::query(
            "INSERT INTO schedule_templates
                (day_of_week, start_time, end_time, interval_minutes, is_active)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(t.day_of_week)
        .bind(t.start_time)
        .bind(t.end_time)
        .bind(t.interval_minutes)
        .bind(t.is_active)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("replace_templates", e))?;
    }
    tx.commit()
        .await
        .map_err(|e| db_error("replace_templates", e))?;

    tracing::info!("Schedule templates replaced ({} days)", body.templates.len());

    let templates = state
        .store
        .templates()
        .await
        .map_err(|e| store_error("replace_templates", e))?;
    Ok(Json(ApiResponse::success(templates)))
}

// ── Services ──

fn check_service_fields(name: &str, duration_minutes: i64, price: i64) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(validation_error(ValidationError::EmptyName));
    }
    if duration_minutes <= 0 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Длительность должна быть больше нуля",
        ));
    }
    if price < 0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "Цена не может быть отрицательной"));
    }
    Ok(())
}

async fn fetch_service(state: &AppState, id: i64) -> Result<Service, ApiError> {
    sqlx::query_as::<_, Service>(&format!("{} WHERE id = ?", SERVICE_SELECT))
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| db_error("fetch_service", e))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Услуга не найдена"))
}

/// GET /api/admin/services — including deactivated ones.
pub async fn list_all_services(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Service>>>, ApiError> {
    extract_admin(&headers, &state)?;

    let services = sqlx::query_as::<_, Service>(&format!("{} ORDER BY id", SERVICE_SELECT))
        .fetch_all(&state.db)
        .await
        .map_err(|e| db_error("list_all_services", e))?;

    Ok(Json(ApiResponse::success(services)))
}

/// POST /api/admin/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, ApiError> {
    extract_admin(&headers, &state)?;
    check_service_fields(&body.name, body.duration_minutes, body.price)?;

    let id = sqlx::query(
        "INSERT INTO services (name, short_description, description, duration_minutes, price)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(body.name.trim())
    .bind(body.short_description.as_deref().unwrap_or(""))
    .bind(body.description.as_deref().unwrap_or(""))
    .bind(body.duration_minutes)
    .bind(body.price)
    .execute(&state.db)
    .await
    .map_err(|e| db_error("create_service", e))?
    .last_insert_rowid();

    tracing::info!("Service {} created: {}", id, body.name.trim());
    Ok(Json(ApiResponse::success(fetch_service(&state, id).await?)))
}

/// PUT /api/admin/services/{id} — partial update; `is_active: false` hides
/// the service from clients while existing bookings keep it.
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, ApiError> {
    extract_admin(&headers, &state)?;

    let current = fetch_service(&state, id).await?;
    let updated = Service {
        id,
        name: body.name.map(|n| n.trim().to_string()).unwrap_or(current.name),
        short_description: body.short_description.unwrap_or(current.short_description),
        description: body.description.unwrap_or(current.description),
        duration_minutes: body.duration_minutes.unwrap_or(current.duration_minutes),
        price: body.price.unwrap_or(current.price),
        is_active: body.is_active.unwrap_or(current.is_active),
    };
    check_service_fields(&updated.name, updated.duration_minutes, updated.price)?;

    sqlx::query(
        "UPDATE services SET name = ?, short_description = ?, description = ?,
            duration_minutes = ?, price = ?, is_active = ?
         WHERE id = ?",
    )
    .bind(&updated.name)
    .bind(&updated.short_description)
    .bind(&updated.description)
    .bind(updated.duration_minutes)
    .bind(updated.price)
    .bind(updated.is_active)
    .bind(id)
    .execute(&state.db)
    .await
    .map_err(|e| db_error("update_service", e))?;

    if current.is_active && !updated.is_active {
        tracing::info!("Service {} deactivated", id);
    }
    Ok(Json(ApiResponse::success(updated)))
}

// ── Expenses & stats ──

/// `?month=` or the current business month.
fn resolve_month(state: &AppState, month: Option<String>) -> Result<String, ApiError> {
    let month = month.unwrap_or_else(|| state.lifecycle.time().current_month());
    validate_month(&month).map_err(validation_error)?;
    Ok(month)
}

async fn month_expenses(state: &AppState, month: &str) -> Result<Vec<Expense>, ApiError> {
    sqlx::query_as::<_, Expense>(
        "SELECT id, name, amount, month, created_at FROM expenses
         WHERE month = ? ORDER BY created_at, id",
    )
    .bind(month)
    .fetch_all(&state.db)
    .await
    .map_err(|e| db_error("month_expenses", e))
}

/// GET /api/admin/expenses?month=YYYY-MM
pub async fn list_expenses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<MonthQuery>,
) -> Result<Json<ApiResponse<Vec<Expense>>>, ApiError> {
    extract_admin(&headers, &state)?;
    let month = resolve_month(&state, query.month)?;
    Ok(Json(ApiResponse::success(month_expenses(&state, &month).await?)))
}

/// POST /api/admin/expenses
pub async fn create_expense(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateExpenseRequest>,
) -> Result<Json<ApiResponse<Expense>>, ApiError> {
    extract_admin(&headers, &state)?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(validation_error(ValidationError::EmptyName));
    }
    validate_amount(body.amount).map_err(validation_error)?;
    validate_month(&body.month).map_err(validation_error)?;

    let id = sqlx::query("INSERT INTO expenses (name, amount, month) VALUES (?, ?, ?)")
        .bind(name)
        .bind(body.amount)
        .bind(&body.month)
        .execute(&state.db)
        .await
        .map_err(|e| db_error("create_expense", e))?
        .last_insert_rowid();

    let expense = sqlx::query_as::<_, Expense>(
        "SELECT id, name, amount, month, created_at FROM expenses WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| db_error("create_expense", e))?;

    Ok(Json(ApiResponse::success(expense)))
}

/// DELETE /api/admin/expenses/{id}
pub async fn delete_expense(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    extract_admin(&headers, &state)?;

    let result = sqlx::query("DELETE FROM expenses WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(|e| db_error("delete_expense", e))?;

    if result.rows_affected() == 0 {
        return Err(api_error(StatusCode::NOT_FOUND, "Расход не найден"));
    }
    Ok(Json(ApiResponse::success(())))
}

/// GET /api/admin/stats?month=YYYY-MM
pub async fn monthly_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<MonthQuery>,
) -> Result<Json<ApiResponse<MonthlyStats>>, ApiError> {
    extract_admin(&headers, &state)?;
    let month = resolve_month(&state, query.month)?;

    // Full history, so first visits can be told from returning clients
    let bookings = state
        .store
        .bookings_filtered(None, None)
        .await
        .map_err(|e| store_error("monthly_stats", e))?;
    let expenses = month_expenses(&state, &month).await?;

    Ok(Json(ApiResponse::success(stats::monthly_stats(
        &month, &bookings, &expenses,
    ))))
}
