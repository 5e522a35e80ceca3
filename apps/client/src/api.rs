use std::path::PathBuf;
use std::time::Duration;

use chocoo_core::models::*;
use chocoo_core::validation::ProfileUpdate;
use chrono::NaiveDate;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ClientError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Where [`FileSnapshotStore`](crate::FileSnapshotStore) keeps snapshots.
    pub cache_dir: PathBuf,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            cache_dir: std::env::temp_dir().join("chocoo-cache"),
        }
    }
}

/// Who is calling. Passed explicitly to every authenticated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    /// Raw Mini App initData, sent as `Authorization: tma <initData>`.
    pub init_data: String,
    pub telegram_id: i64,
    pub role: Role,
}

impl CallerContext {
    fn authorization(&self) -> String {
        format!("tma {}", self.init_data)
    }

    /// Changes whenever cached data may belong to someone else.
    pub fn identity(&self) -> String {
        let role = match self.role {
            Role::Admin => "admin",
            Role::Client => "client",
        };
        format!("{}:{}", self.telegram_id, role)
    }
}

#[derive(Debug, Serialize)]
struct NewBooking {
    service_id: i64,
    slot_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    remind_before_hours: Option<i64>,
}

/// Typed client for the `{ ok, data, error }` HTTP API.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Network(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self::with_http(&config.base_url, http))
    }

    pub fn with_http(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        ctx: Option<&CallerContext>,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        let mut req = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(ctx) = ctx {
            req = req.header(reqwest::header::AUTHORIZATION, ctx.authorization());
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        decode_envelope(status.as_u16(), &bytes)
    }

    // ── Public reads ──

    pub async fn salon(&self) -> Result<SalonProfile, ClientError> {
        self.request(Method::GET, "/api/salon", None, None).await
    }

    pub async fn faq(&self) -> Result<Vec<FaqItem>, ClientError> {
        self.request(Method::GET, "/api/faq", None, None).await
    }

    pub async fn services(&self) -> Result<Vec<Service>, ClientError> {
        self.request(Method::GET, "/api/services", None, None).await
    }

    pub async fn slots(&self, date: NaiveDate) -> Result<Vec<Slot>, ClientError> {
        let path = format!("/api/slots?date={}", date);
        self.request(Method::GET, &path, None, None).await
    }

    pub async fn availability(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DayAvailability>, ClientError> {
        let path = format!("/api/slots/availability?from={}&to={}", from, to);
        self.request(Method::GET, &path, None, None).await
    }

    // ── Client ──

    pub async fn auth(&self, ctx: &CallerContext) -> Result<ClientProfile, ClientError> {
        self.request(Method::POST, "/api/users/auth", Some(ctx), None)
            .await
    }

    pub async fn update_profile(
        &self,
        ctx: &CallerContext,
        update: &ProfileUpdate,
    ) -> Result<ClientProfile, ClientError> {
        let body = to_body(update)?;
        self.request(Method::PATCH, "/api/users/profile", Some(ctx), Some(body))
            .await
    }

    pub async fn create_booking(
        &self,
        ctx: &CallerContext,
        service_id: i64,
        slot_id: i64,
        remind_before_hours: Option<i64>,
    ) -> Result<BookingDetail, ClientError> {
        let body = to_body(&NewBooking {
            service_id,
            slot_id,
            remind_before_hours,
        })?;
        self.request(Method::POST, "/api/bookings", Some(ctx), Some(body))
            .await
    }

    pub async fn my_bookings(&self, ctx: &CallerContext) -> Result<Vec<BookingDetail>, ClientError> {
        self.request(Method::GET, "/api/bookings/my", Some(ctx), None)
            .await
    }

    pub async fn cancel_booking(
        &self,
        ctx: &CallerContext,
        booking_id: i64,
    ) -> Result<BookingDetail, ClientError> {
        let path = format!("/api/bookings/{}/cancel", booking_id);
        self.request(Method::PATCH, &path, Some(ctx), None).await
    }

    // ── Admin ──

    pub async fn admin_bookings(
        &self,
        ctx: &CallerContext,
        date: Option<NaiveDate>,
        status: Option<BookingStatus>,
    ) -> Result<Vec<BookingDetail>, ClientError> {
        let mut params = Vec::new();
        if let Some(date) = date {
            params.push(format!("date={}", date));
        }
        if let Some(status) = status {
            params.push(format!("status={}", status.as_str()));
        }
        let path = if params.is_empty() {
            "/api/admin/bookings".to_string()
        } else {
            format!("/api/admin/bookings?{}", params.join("&"))
        };
        self.request(Method::GET, &path, Some(ctx), None).await
    }

    pub async fn admin_cancel(
        &self,
        ctx: &CallerContext,
        booking_id: i64,
    ) -> Result<BookingDetail, ClientError> {
        let path = format!("/api/admin/bookings/{}/cancel", booking_id);
        self.request(Method::PATCH, &path, Some(ctx), None).await
    }

    pub async fn admin_reschedule(
        &self,
        ctx: &CallerContext,
        booking_id: i64,
        new_slot_id: i64,
    ) -> Result<BookingDetail, ClientError> {
        let path = format!("/api/admin/bookings/{}/reschedule", booking_id);
        let body = serde_json::json!({ "new_slot_id": new_slot_id });
        self.request(Method::PATCH, &path, Some(ctx), Some(body))
            .await
    }

    pub async fn admin_toggle_slot(
        &self,
        ctx: &CallerContext,
        slot_id: i64,
    ) -> Result<Slot, ClientError> {
        let path = format!("/api/admin/slots/{}/toggle", slot_id);
        self.request(Method::PATCH, &path, Some(ctx), None).await
    }

    /// Generates from the day's schedule.
    pub async fn admin_generate_slots(
        &self,
        ctx: &CallerContext,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, ClientError> {
        let body = serde_json::json!({ "date": date });
        self.request(Method::POST, "/api/admin/slots/generate", Some(ctx), Some(body))
            .await
    }
}

fn to_body<B: Serialize>(body: &B) -> Result<Value, ClientError> {
    serde_json::to_value(body).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Unwraps `{ ok, data, error }`. Non-JSON error pages still surface their status.
fn decode_envelope<T: DeserializeOwned>(status: u16, bytes: &[u8]) -> Result<T, ClientError> {
    let envelope: ApiResponse<Value> = match serde_json::from_slice(bytes) {
        Ok(envelope) => envelope,
        Err(_) if !(200..300).contains(&status) => {
            return Err(ClientError::Api {
                status,
                message: "Ошибка сервера".into(),
            })
        }
        Err(e) => return Err(ClientError::Decode(e.to_string())),
    };

    if !envelope.ok {
        return Err(ClientError::Api {
            status,
            message: envelope.error.unwrap_or_else(|| "Ошибка сервера".into()),
        });
    }
    serde_json::from_value(envelope.data.unwrap_or(Value::Null))
        .map_err(|e| ClientError::Decode(e.to_string()))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use chocoo_core::ErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn ctx() -> CallerContext {
        CallerContext {
            init_data: "query_id=1&hash=abc".into(),
            telegram_id: 1001,
            role: Role::Client,
        }
    }

    fn local_client(base_url: &str, timeout: Duration) -> ApiClient {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .unwrap();
        ApiClient::with_http(base_url, http)
    }

    /// Answers one request with a canned response.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_decode_success() {
        let body = br#"{"ok":true,"data":[{"id":1,"question":"Q","answer":"A","order_index":1}],"error":null}"#;
        let faq: Vec<FaqItem> = decode_envelope(200, body).unwrap();
        assert_eq!(faq[0].question, "Q");
    }

    #[test]
    fn test_decode_unit_data() {
        let body = br#"{"ok":true,"data":null,"error":null}"#;
        let unit: Result<(), _> = decode_envelope(200, body);
        assert!(unit.is_ok());
    }

    #[test]
    fn test_decode_error_page() {
        let err = decode_envelope::<Vec<Slot>>(502, b"<html>Bad Gateway</html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_identity_tracks_role() {
        let client = ctx();
        let admin = CallerContext {
            role: Role::Admin,
            ..ctx()
        };
        assert_ne!(client.identity(), admin.identity());
    }

    #[tokio::test]
    async fn test_conflict_surfaces_server_message() {
        let base = serve_once(
            "409 Conflict",
            r#"{"ok":false,"data":null,"error":"Слот уже занят или заблокирован"}"#,
        )
        .await;
        let api = local_client(&base, DEFAULT_TIMEOUT);

        let err = api.create_booking(&ctx(), 1, 7, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.message(), "Слот уже занят или заблокирован");
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let api = local_client(&format!("http://{}", addr), Duration::from_millis(200));
        let err = api.services().await.unwrap_err();
        assert_eq!(err, ClientError::Timeout);
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
