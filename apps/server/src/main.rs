mod auth;
mod config;
mod error;
mod handlers;
mod models;
mod notify;

use anyhow::Context;
use axum::{
    http::HeaderValue,
    routing::{delete, get, patch, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use chocoo_core::store::SqliteStore;
use chocoo_core::time::SystemClock;
use chocoo_core::{BookingLifecycle, TimePolicy};

use config::Config;
use notify::Notifier;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    /// Same pool as `db`, behind the compare-and-swap store.
    pub store: SqliteStore,
    pub lifecycle: BookingLifecycle,
    pub notifier: Notifier,
    pub bot_token: String,
    pub admin_tg_ids: Vec<i64>,
    pub started_at: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // ── Tracing ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.admin_tg_ids.is_empty() {
        tracing::warn!("ADMIN_TG_IDS is empty, admin endpoints will refuse everyone");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open {}", config.database_url))?;

    chocoo_core::db::run_migrations(&pool).await?;

    let time = TimePolicy::new(config.utc_offset_hours, Arc::new(SystemClock))
        .context("BUSINESS_UTC_OFFSET_HOURS is out of range")?;
    let store = SqliteStore::new(pool.clone());
    let lifecycle = BookingLifecycle::new(Arc::new(store.clone()), time);

    let state = Arc::new(AppState {
        db: pool,
        store,
        lifecycle,
        notifier: Notifier::new(config.bot_token.clone(), config.admin_tg_ids.clone()),
        bot_token: config.bot_token.clone(),
        admin_tg_ids: config.admin_tg_ids.clone(),
        started_at: Instant::now(),
    });

    let app = app(state).layer(cors_layer(config.webapp_url.as_deref())?);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Chocoo server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// CORS: whitelist WEBAPP_URL when configured, otherwise allow any.
fn cors_layer(webapp_url: Option<&str>) -> anyhow::Result<CorsLayer> {
    let origins = match webapp_url {
        Some(url) => AllowOrigin::list([
            url.parse::<HeaderValue>()
                .context("WEBAPP_URL must be a valid origin")?,
            HeaderValue::from_static("http://localhost:5173"), // Vite dev server
        ]),
        None => AllowOrigin::any(),
    };
    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any))
}

pub fn app(state: Arc<AppState>) -> Router {
    use handlers::{admin, client, health};

    let public_routes = Router::new()
        .route("/api/health", get(health::health))
        .route("/api/salon", get(client::salon))
        .route("/api/faq", get(client::faq))
        .route("/api/services", get(client::list_services))
        .route("/api/slots", get(client::list_slots))
        .route("/api/slots/availability", get(client::availability));

    let client_routes = Router::new()
        .route("/api/users/auth", post(client::auth_user))
        .route("/api/users/profile", patch(client::update_profile))
        .route("/api/bookings", post(client::create_booking))
        .route("/api/bookings/my", get(client::my_bookings))
        .route("/api/bookings/{id}/cancel", patch(client::cancel_booking));

    let admin_routes = Router::new()
        .route("/api/admin/bookings", get(admin::list_bookings))
        .route(
            "/api/admin/bookings/{id}/cancel",
            patch(admin::cancel_booking),
        )
        .route(
            "/api/admin/bookings/{id}/reschedule",
            patch(admin::reschedule_booking),
        )
        .route("/api/admin/slots", get(admin::list_slots))
        .route("/api/admin/slots/{id}/toggle", patch(admin::toggle_slot))
        .route("/api/admin/slots/generate", post(admin::generate_slots))
        .route(
            "/api/admin/schedule-templates",
            get(admin::list_templates).put(admin::replace_templates),
        )
        .route(
            "/api/admin/services",
            get(admin::list_all_services).post(admin::create_service),
        )
        .route("/api/admin/services/{id}", put(admin::update_service))
        .route(
            "/api/admin/expenses",
            get(admin::list_expenses).post(admin::create_expense),
        )
        .route("/api/admin/expenses/{id}", delete(admin::delete_expense))
        .route("/api/admin/stats", get(admin::monthly_stats));

    Router::new()
        .merge(public_routes)
        .merge(client_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TelegramUser;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use chocoo_core::time::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const TOKEN: &str = "123456:TEST";
    const ADMIN_TG: i64 = 9000;
    const TODAY: &str = "2025-06-02";

    struct TestApp {
        state: Arc<AppState>,
        clock: Arc<FixedClock>,
    }

    /// Business time 07:00 on Monday 2025-06-02 (04:00 UTC).
    async fn test_app() -> TestApp {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        chocoo_core::db::run_migrations(&pool).await.unwrap();

        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 4, 0, 0).unwrap(),
        ));
        let time = TimePolicy::new(3, clock.clone()).unwrap();
        let store = SqliteStore::new(pool.clone());
        let state = Arc::new(AppState {
            db: pool,
            lifecycle: BookingLifecycle::new(Arc::new(store.clone()), time),
            store,
            notifier: Notifier::disabled(),
            bot_token: TOKEN.to_string(),
            admin_tg_ids: vec![ADMIN_TG],
            started_at: Instant::now(),
        });
        TestApp { state, clock }
    }

    fn tg(id: i64) -> TelegramUser {
        TelegramUser {
            id,
            first_name: format!("user{}", id),
            last_name: None,
            username: None,
        }
    }

    impl TestApp {
        async fn call(
            &self,
            method: Method,
            uri: &str,
            user: Option<i64>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(id) = user {
                let init_data =
                    auth::signed_init_data(&tg(id), TOKEN, Utc::now().timestamp());
                req = req.header(header::AUTHORIZATION, format!("tma {}", init_data));
            }
            let req = match body {
                Some(b) => req
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(b.to_string()))
                    .unwrap(),
                None => req.body(Body::empty()).unwrap(),
            };

            let res = app(self.state.clone()).oneshot(req).await.unwrap();
            let status = res.status();
            let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, json)
        }

        /// Registers a client with a complete profile.
        async fn client(&self, id: i64) {
            let (status, _) = self.call(Method::POST, "/api/users/auth", Some(id), None).await;
            assert_eq!(status, StatusCode::OK);
            let (status, _) = self
                .call(
                    Method::PATCH,
                    "/api/users/profile",
                    Some(id),
                    Some(json!({
                        "first_name": "Анна",
                        "phone": "+375291234567",
                        "instagram": "chocoo.fan",
                        "consent_given": true
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
        }

        /// Two 30-minute slots today, 18:00 and 18:30. Returns their ids.
        async fn evening_slots(&self) -> (i64, i64) {
            let (status, body) = self
                .call(
                    Method::POST,
                    "/api/admin/slots/generate",
                    Some(ADMIN_TG),
                    Some(json!({
                        "date": TODAY,
                        "start_time": "18:00:00",
                        "end_time": "19:00:00",
                        "interval_minutes": 30
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            let slots = body["data"].as_array().unwrap();
            assert_eq!(slots.len(), 2);
            (slots[0]["id"].as_i64().unwrap(), slots[1]["id"].as_i64().unwrap())
        }

        async fn book(&self, client: i64, slot_id: i64) -> (StatusCode, Value) {
            self.call(
                Method::POST,
                "/api/bookings",
                Some(client),
                Some(json!({ "service_id": 1, "slot_id": slot_id })),
            )
            .await
        }
    }

    #[tokio::test]
    async fn test_health() {
        let t = test_app().await;
        let (status, body) = t.call(Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["business_now"].as_str().unwrap().starts_with("2025-06-02T07:00:00"));
        assert_eq!(body["business_today"], "2025-06-02");
        assert_eq!(body["store_reachable"], true);
    }

    #[tokio::test]
    async fn test_public_content() {
        let t = test_app().await;
        let (_, salon) = t.call(Method::GET, "/api/salon", None, None).await;
        assert_eq!(salon["data"]["name"], "Chocoo");
        let (_, services) = t.call(Method::GET, "/api/services", None, None).await;
        assert_eq!(services["data"].as_array().unwrap().len(), 3);
        let (_, faq) = t.call(Method::GET, "/api/faq", None, None).await;
        assert_eq!(faq["data"][0]["order_index"], 1);
    }

    #[tokio::test]
    async fn test_missing_auth_is_unauthorized() {
        let t = test_app().await;
        let (status, body) = t.call(Method::GET, "/api/bookings/my", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_admin_routes_forbidden_for_clients() {
        let t = test_app().await;
        let (status, _) = t
            .call(Method::GET, "/api/admin/bookings", Some(1001), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_auth_assigns_admin_role() {
        let t = test_app().await;
        let (_, admin) = t.call(Method::POST, "/api/users/auth", Some(ADMIN_TG), None).await;
        assert_eq!(admin["data"]["role"], "admin");
        let (_, client) = t.call(Method::POST, "/api/users/auth", Some(1001), None).await;
        assert_eq!(client["data"]["role"], "client");
    }

    #[tokio::test]
    async fn test_profile_requires_consent() {
        let t = test_app().await;
        t.call(Method::POST, "/api/users/auth", Some(1001), None).await;
        let (status, body) = t
            .call(
                Method::PATCH,
                "/api/users/profile",
                Some(1001),
                Some(json!({
                    "first_name": "Анна",
                    "phone": "+375291234567",
                    "consent_given": false
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Необходимо согласие на обработку персональных данных"
        );
    }

    #[tokio::test]
    async fn test_booking_needs_profile() {
        let t = test_app().await;
        let (slot, _) = t.evening_slots().await;
        t.call(Method::POST, "/api/users/auth", Some(1001), None).await;
        let (status, body) = t.book(1001, slot).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Необходимо заполнить профиль перед записью");
    }

    #[tokio::test]
    async fn test_book_then_slot_is_taken() {
        let t = test_app().await;
        let (slot, other) = t.evening_slots().await;
        t.client(1001).await;
        t.client(1002).await;

        let (status, body) = t.book(1001, slot).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "confirmed");
        assert_eq!(body["data"]["slot"]["status"], "booked");
        assert_eq!(body["data"]["remind_before_hours"], 2);

        let (status, body) = t.book(1002, slot).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Слот уже занят или заблокирован");

        let (_, visible) = t
            .call(Method::GET, &format!("/api/slots?date={}", TODAY), None, None)
            .await;
        let ids: Vec<i64> = visible["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![other]);
    }

    #[tokio::test]
    async fn test_client_cancel_window() {
        let t = test_app().await;
        let (slot, _) = t.evening_slots().await;
        t.client(1001).await;
        let (_, body) = t.book(1001, slot).await;
        let booking = body["data"]["id"].as_i64().unwrap();

        // 09:30 business time: 8h30m before 18:00
        t.clock.set(Utc.with_ymd_and_hms(2025, 6, 2, 6, 30, 0).unwrap());
        let uri = format!("/api/bookings/{}/cancel", booking);
        let (status, body) = t.call(Method::PATCH, &uri, Some(1001), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            body["error"],
            "Отмена возможна не позднее чем за 10 часов до записи"
        );

        // The master can still cancel
        let uri = format!("/api/admin/bookings/{}/cancel", booking);
        let (status, body) = t.call(Method::PATCH, &uri, Some(ADMIN_TG), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "cancelled");
        assert_eq!(body["data"]["slot"]["status"], "available");
    }

    #[tokio::test]
    async fn test_client_cannot_cancel_someone_elses_booking() {
        let t = test_app().await;
        let (slot, _) = t.evening_slots().await;
        t.client(1001).await;
        t.client(1002).await;
        let (_, body) = t.book(1001, slot).await;
        let uri = format!("/api/bookings/{}/cancel", body["data"]["id"]);

        let (status, _) = t.call(Method::PATCH, &uri, Some(1002), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = t.call(Method::PATCH, &uri, Some(1001), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = t.call(Method::PATCH, &uri, Some(1001), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Запись уже отменена");
    }

    #[tokio::test]
    async fn test_admin_reschedule_and_toggle() {
        let t = test_app().await;
        let (slot, other) = t.evening_slots().await;
        t.client(1001).await;
        let (_, body) = t.book(1001, slot).await;
        let booking = body["data"]["id"].as_i64().unwrap();

        // A booked slot cannot be blocked
        let (status, _) = t
            .call(
                Method::PATCH,
                &format!("/api/admin/slots/{}/toggle", slot),
                Some(ADMIN_TG),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = t
            .call(
                Method::PATCH,
                &format!("/api/admin/bookings/{}/reschedule", booking),
                Some(ADMIN_TG),
                Some(json!({ "new_slot_id": other })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["slot"]["id"], other);

        let (_, slots) = t
            .call(
                Method::GET,
                &format!("/api/admin/slots?date={}", TODAY),
                Some(ADMIN_TG),
                None,
            )
            .await;
        assert_eq!(slots["data"][0]["status"], "available");
        assert_eq!(slots["data"][1]["status"], "booked");

        let (status, body) = t
            .call(
                Method::PATCH,
                &format!("/api/admin/slots/{}/toggle", slot),
                Some(ADMIN_TG),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "blocked");
    }

    #[tokio::test]
    async fn test_generate_twice_conflicts() {
        let t = test_app().await;
        t.evening_slots().await;
        let (status, body) = t
            .call(
                Method::POST,
                "/api/admin/slots/generate",
                Some(ADMIN_TG),
                Some(json!({ "date": TODAY })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Слоты на эту дату уже созданы");
    }

    #[tokio::test]
    async fn test_generate_from_templates() {
        let t = test_app().await;
        let (status, _) = t
            .call(
                Method::PUT,
                "/api/admin/schedule-templates",
                Some(ADMIN_TG),
                Some(json!({ "templates": [{
                    "day_of_week": 3,
                    "start_time": "10:00:00",
                    "end_time": "12:00:00",
                    "interval_minutes": 60,
                    "is_active": true
                }]})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        // 2025-06-04 is a Wednesday
        let (_, body) = t
            .call(
                Method::POST,
                "/api/admin/slots/generate",
                Some(ADMIN_TG),
                Some(json!({ "date": "2025-06-04" })),
            )
            .await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (_, days) = t
            .call(
                Method::GET,
                "/api/slots/availability?from=2025-06-01&to=2025-06-07",
                None,
                None,
            )
            .await;
        assert_eq!(days["data"][0]["date"], "2025-06-04");
        assert_eq!(days["data"][0]["total"], 2);
        assert_eq!(days["data"][0]["free"], 2);
    }

    #[tokio::test]
    async fn test_duplicate_template_weekday_rejected() {
        let t = test_app().await;
        let day = json!({
            "day_of_week": 1,
            "start_time": "09:00:00",
            "end_time": "18:00:00",
            "interval_minutes": 30,
            "is_active": true
        });
        let (status, _) = t
            .call(
                Method::PUT,
                "/api/admin/schedule-templates",
                Some(ADMIN_TG),
                Some(json!({ "templates": [day.clone(), day] })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_deactivated_service_hidden() {
        let t = test_app().await;
        let (status, body) = t
            .call(
                Method::PUT,
                "/api/admin/services/2",
                Some(ADMIN_TG),
                Some(json!({ "is_active": false })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Пилинг");

        let (_, services) = t.call(Method::GET, "/api/services", None, None).await;
        assert_eq!(services["data"].as_array().unwrap().len(), 2);
        let (_, all) = t
            .call(Method::GET, "/api/admin/services", Some(ADMIN_TG), None)
            .await;
        assert_eq!(all["data"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_expenses_and_stats() {
        let t = test_app().await;
        let (status, _) = t
            .call(
                Method::POST,
                "/api/admin/expenses",
                Some(ADMIN_TG),
                Some(json!({ "name": "Аренда", "amount": 0, "month": "2025-06" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = t
            .call(
                Method::POST,
                "/api/admin/expenses",
                Some(ADMIN_TG),
                Some(json!({ "name": "Аренда", "amount": 300, "month": "2025-06" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let expense = body["data"]["id"].as_i64().unwrap();

        let (_, stats) = t
            .call(Method::GET, "/api/admin/stats", Some(ADMIN_TG), None)
            .await;
        assert_eq!(stats["data"]["month"], "2025-06");
        assert_eq!(stats["data"]["expenses"], 300);
        assert_eq!(stats["data"]["profit"], -300);

        let uri = format!("/api/admin/expenses/{}", expense);
        let (status, _) = t.call(Method::DELETE, &uri, Some(ADMIN_TG), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = t.call(Method::DELETE, &uri, Some(ADMIN_TG), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_cors_rejects_bad_origin() {
        assert!(cors_layer(Some("https://chocoo.example")).is_ok());
        assert!(cors_layer(Some("bad\norigin")).is_err());
        assert!(cors_layer(None).is_ok());
    }
}
