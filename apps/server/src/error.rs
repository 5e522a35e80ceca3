use axum::{http::StatusCode, Json};
use chocoo_core::models::{ApiResponse, BookingStatus};
use chocoo_core::{BookingError, ErrorKind, StoreError, ValidationError};

/// Error half of every handler's return type.
pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

pub fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::error(msg)))
}

/// Logs the database failure and hides it behind a generic message.
pub fn db_error(context: &str, e: sqlx::Error) -> ApiError {
    tracing::error!("{}: {}", context, e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Ошибка сервера")
}

pub fn store_error(context: &str, e: StoreError) -> ApiError {
    booking_error(context, e.into())
}

pub fn validation_error(e: ValidationError) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, validation_message(&e))
}

pub fn booking_error(context: &str, e: BookingError) -> ApiError {
    let status = match e.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Transient => {
            tracing::error!("{}: {}", context, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status != StatusCode::INTERNAL_SERVER_ERROR {
        tracing::warn!("{}: {}", context, e);
    }
    api_error(status, booking_message(&e))
}

fn booking_message(e: &BookingError) -> String {
    match e {
        BookingError::Validation(v) => validation_message(v),
        BookingError::SlotUnavailable(_) => "Слот уже занят или заблокирован".into(),
        BookingError::ClientNotEligible => "Необходимо заполнить профиль перед записью".into(),
        BookingError::ServiceInactive(_) => "Услуга больше не доступна".into(),
        BookingError::CancellationWindowExpired { min_hours, .. } => format!(
            "Отмена возможна не позднее чем за {} часов до записи",
            min_hours
        ),
        BookingError::BookingTooLate { min_hours } => {
            format!("Запись возможна минимум за {} час до начала", min_hours)
        }
        BookingError::SlotOccupied(_) => "На слот есть запись. Сначала отмените её".into(),
        BookingError::SlotInPast(_) => "Это время уже прошло".into(),
        BookingError::BookingNotActive { status, .. } => match status {
            BookingStatus::Completed => "Завершённую запись нельзя изменить".into(),
            _ => "Запись уже отменена".into(),
        },
        BookingError::AlreadyGenerated(_) => "Слоты на эту дату уже созданы".into(),
        BookingError::NotFound { entity, .. } => not_found_message(entity).into(),
        BookingError::Store(_) => "Ошибка сервера".into(),
    }
}

fn not_found_message(entity: &str) -> &'static str {
    match entity {
        "booking" => "Запись не найдена",
        "slot" => "Слот не найден",
        "service" => "Услуга не найдена",
        "client" => "Пользователь не найден. Сначала вызовите /api/users/auth",
        _ => "Не найдено",
    }
}

fn validation_message(e: &ValidationError) -> String {
    match e {
        ValidationError::InvalidPhone => "Телефон должен быть в формате +375291234567".into(),
        ValidationError::ConsentRequired => {
            "Необходимо согласие на обработку персональных данных".into()
        }
        ValidationError::EmptyName => "Имя не может быть пустым".into(),
        ValidationError::NonPositiveAmount => "Сумма должна быть больше нуля".into(),
        ValidationError::InvalidMonth => "Месяц должен быть в формате ГГГГ-ММ".into(),
        ValidationError::NonPositiveInterval => "Интервал должен быть больше нуля".into(),
        ValidationError::EmptyWindow => "Время окончания должно быть позже начала".into(),
        ValidationError::InvalidWeekday => "День недели должен быть от 0 до 6".into(),
        ValidationError::DuplicateWeekday(d) => format!("День недели {} указан дважды", d),
        ValidationError::PastDate(d) => format!("Нельзя создать слоты на прошедшую дату {}", d),
        ValidationError::InvalidReminder(h) => {
            format!("Напоминание за {} ч недоступно", h)
        }
        ValidationError::SameSlot => "Запись уже на этом слоте".into(),
        ValidationError::InvalidSlotStatus => "Слот можно только открыть или заблокировать".into(),
    }
}

// ── Tests ──
