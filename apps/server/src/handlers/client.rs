use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use chocoo_core::models::*;
use chocoo_core::slots::visible_to_client;
use chocoo_core::validation::ProfileUpdate;
use chocoo_core::{BookingRequest, SchedulingStore};

use crate::auth::{self, TelegramUser};
use crate::error::{api_error, booking_error, db_error, store_error, validation_error, ApiError};
use crate::models::*;
use crate::AppState;

/// Longest range `/api/slots/availability` will count in one call.
const MAX_AVAILABILITY_DAYS: i64 = 62;

const CLIENT_SELECT: &str =
    "SELECT id, telegram_id, first_name, username, phone, instagram, consent_given, role
     FROM users WHERE telegram_id = ?";

/// Helper: extract TelegramUser from Authorization header.
pub(crate) fn extract_user(headers: &HeaderMap, bot_token: &str) -> Result<TelegramUser, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Missing Authorization header"))?;
    auth::extract_user_from_header(header, bot_token)
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Invalid Telegram auth"))
}

/// The stored profile behind an authenticated Telegram user.
async fn current_client(state: &AppState, user: &TelegramUser) -> Result<ClientProfile, ApiError> {
    sqlx::query_as::<_, ClientProfile>(CLIENT_SELECT)
        .bind(user.id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| db_error("current_client", e))?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "Пользователь не найден. Сначала вызовите /api/users/auth",
            )
        })
}

// ── Salon content ──

/// GET /api/salon
pub async fn salon(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<SalonProfile>>, ApiError> {
    let salon = sqlx::query_as::<_, SalonProfile>(
        "SELECT name, description, address, phone, working_hours_text, instagram
         FROM salon_info WHERE id = 1",
    )
    .fetch_optional(&state.db)
    .await
    .map_err(|e| db_error("salon", e))?
    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Информация о салоне не заполнена"))?;

    Ok(Json(ApiResponse::success(salon)))
}

/// GET /api/faq
pub async fn faq(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<FaqItem>>>, ApiError> {
    let items = sqlx::query_as::<_, FaqItem>(
        "SELECT id, question, answer, order_index FROM faq_items ORDER BY order_index, id",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| db_error("faq", e))?;

    Ok(Json(ApiResponse::success(items)))
}

/// GET /api/services — active services only.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Service>>>, ApiError> {
    let services = sqlx::query_as::<_, Service>(
        "SELECT id, name, short_description, description, duration_minutes, price, is_active
         FROM services WHERE is_active = 1 ORDER BY id",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| db_error("list_services", e))?;

    Ok(Json(ApiResponse::success(services)))
}

// ── Slots ──

/// GET /api/slots?date=YYYY-MM-DD — slots a client can still book that day.
pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<ApiResponse<Vec<Slot>>>, ApiError> {
    let time = state.lifecycle.time();
    let today = time.today();
    if query.date < today {
        return Ok(Json(ApiResponse::success(vec![])));
    }

    let slots = state
        .store
        .slots_for_date(query.date)
        .await
        .map_err(|e| store_error("list_slots", e))?;

    let visible = visible_to_client(slots, query.date, today, time.now().time());
    Ok(Json(ApiResponse::success(visible)))
}

/// GET /api/slots/availability?from=&to= — free/total counts per generated date.
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<ApiResponse<Vec<DayAvailability>>>, ApiError> {
    let span = (query.to - query.from).num_days();
    if !(0..=MAX_AVAILABILITY_DAYS).contains(&span) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Диапазон дат должен быть от 1 до {} дней", MAX_AVAILABILITY_DAYS + 1),
        ));
    }

    let days = sqlx::query_as::<_, DayAvailability>(
        "SELECT date,
                COUNT(*) AS total,
                SUM(CASE WHEN status = 'available' THEN 1 ELSE 0 END) AS free
         FROM slots
         WHERE date BETWEEN ? AND ?
         GROUP BY date
         ORDER BY date",
    )
    .bind(query.from)
    .bind(query.to)
    .fetch_all(&state.db)
    .await
    .map_err(|e| db_error("availability", e))?;

    Ok(Json(ApiResponse::success(days)))
}

// ── Users ──

/// POST /api/users/auth — registers the caller on first visit, refreshes
/// username and role on every later one.
pub async fn auth_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<ClientProfile>>, ApiError> {
    let user = extract_user(&headers, &state.bot_token)?;
    let role = if auth::is_admin(&user, &state.admin_tg_ids) {
        Role::Admin
    } else {
        Role::Client
    };

    // A name the client typed into their profile wins over the Telegram one
    sqlx::query(
        "INSERT INTO users (telegram_id, first_name, username, role) VALUES (?, ?, ?, ?)
         ON CONFLICT(telegram_id) DO UPDATE SET
            username = excluded.username,
            role = excluded.role,
            first_name = COALESCE(users.first_name, excluded.first_name)",
    )
    .bind(user.id)
    .bind(&user.first_name)
    .bind(&user.username)
    .bind(role)
    .execute(&state.db)
    .await
    .map_err(|e| db_error("auth_user", e))?;

    let profile = current_client(&state, &user).await?;
    tracing::info!("User {} authenticated as {:?}", user.id, profile.role);
    Ok(Json(ApiResponse::success(profile)))
}

/// PATCH /api/users/profile — name, phone, Instagram and consent.
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ProfileUpdate>,
) -> Result<Json<ApiResponse<ClientProfile>>, ApiError> {
    let user = extract_user(&headers, &state.bot_token)?;
    let profile = body.validate().map_err(validation_error)?;

    let result = sqlx::query(
        "UPDATE users SET first_name = ?, phone = ?, instagram = ?, consent_given = 1
         WHERE telegram_id = ?",
    )
    .bind(&profile.first_name)
    .bind(&profile.phone)
    .bind(&profile.instagram)
    .bind(user.id)
    .execute(&state.db)
    .await
    .map_err(|e| db_error("update_profile", e))?;

    if result.rows_affected() == 0 {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "Пользователь не найден. Сначала вызовите /api/users/auth",
        ));
    }

    Ok(Json(ApiResponse::success(current_client(&state, &user).await?)))
}

// ── Bookings ──

/// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBookingRequest>,
) -> Result<Json<ApiResponse<BookingDetail>>, ApiError> {
    let user = extract_user(&headers, &state.bot_token)?;
    let client = current_client(&state, &user).await?;

    let request = BookingRequest {
        client_id: client.id,
        service_id: body.service_id,
        slot_id: body.slot_id,
        remind_before_hours: body.remind_before_hours,
    };
    let detail = state
        .lifecycle
        .create(&request)
        .await
        .map_err(|e| booking_error("create_booking", e))?;

    state.notifier.booking_created(&detail);
    Ok(Json(ApiResponse::success(detail)))
}

/// GET /api/bookings/my — newest appointment first.
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<BookingDetail>>>, ApiError> {
    let user = extract_user(&headers, &state.bot_token)?;
    let client = current_client(&state, &user).await?;

    let bookings = state
        .store
        .client_bookings(client.id)
        .await
        .map_err(|e| store_error("my_bookings", e))?;

    Ok(Json(ApiResponse::success(bookings)))
}

/// PATCH /api/bookings/{id}/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<i64>,
) -> Result<Json<ApiResponse<BookingDetail>>, ApiError> {
    let user = extract_user(&headers, &state.bot_token)?;
    let client = current_client(&state, &user).await?;

    let detail = state
        .lifecycle
        .client_cancel(client.id, booking_id)
        .await
        .map_err(|e| booking_error("cancel_booking", e))?;

    state.notifier.booking_cancelled_by_client(&detail);
    Ok(Json(ApiResponse::success(detail)))
}
