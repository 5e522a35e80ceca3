//! The caller's own bookings: cached reads plus optimistic cancellation.

use async_trait::async_trait;
use chocoo_core::models::{BookingDetail, BookingStatus};
use chocoo_core::ErrorKind;
use std::sync::Arc;

use crate::api::{ApiClient, CallerContext};
use crate::cache::{SwrCache, Ttl};
use crate::error::ClientError;
use crate::optimistic::OptimisticState;

const CACHE_NAME: &str = "my_bookings";

#[async_trait]
pub trait BookingsBackend: Send + Sync {
    async fn my_bookings(&self, ctx: &CallerContext) -> Result<Vec<BookingDetail>, ClientError>;
    async fn cancel_booking(
        &self,
        ctx: &CallerContext,
        booking_id: i64,
    ) -> Result<BookingDetail, ClientError>;
}

#[async_trait]
impl BookingsBackend for ApiClient {
    async fn my_bookings(&self, ctx: &CallerContext) -> Result<Vec<BookingDetail>, ClientError> {
        ApiClient::my_bookings(self, ctx).await
    }

    async fn cancel_booking(
        &self,
        ctx: &CallerContext,
        booking_id: i64,
    ) -> Result<BookingDetail, ClientError> {
        ApiClient::cancel_booking(self, ctx, booking_id).await
    }
}

pub struct MyBookings {
    backend: Arc<dyn BookingsBackend>,
    cache: SwrCache,
    state: OptimisticState<Vec<BookingDetail>>,
}

impl MyBookings {
    pub fn new(backend: Arc<dyn BookingsBackend>, cache: SwrCache) -> Self {
        Self {
            backend,
            cache,
            state: OptimisticState::new(Vec::new()),
        }
    }

    /// Current local view.
    pub fn bookings(&self) -> Vec<BookingDetail> {
        self.state.get()
    }

    /// Shows the cached list at once, then replaces it with the server's.
    pub async fn refresh(&self, ctx: &CallerContext) -> Result<Vec<BookingDetail>, ClientError> {
        self.cache.ensure_identity(ctx);

        let backend = self.backend.clone();
        let caller = ctx.clone();
        let read = self.cache.read(CACHE_NAME, Ttl::Long, move || async move {
            backend.my_bookings(&caller).await
        });
        if let Some(cached) = read.cached.clone() {
            self.state.set(cached).await;
        }

        let list = read.settle().await?;
        self.state.set(list.clone()).await;
        Ok(list)
    }

    /// Marks the booking cancelled immediately; reverts if the server refuses.
    ///
    /// A conflict or missing booking means the local list is out of date, so
    /// it is reloaded from the server before the error is returned.
    pub async fn cancel(
        &self,
        ctx: &CallerContext,
        booking_id: i64,
    ) -> Result<BookingDetail, ClientError> {
        let backend = self.backend.clone();
        let caller = ctx.clone();
        let cache = self.cache.clone();

        let result = self
            .state
            .mutate(
                |list| {
                    if let Some(b) = list.iter_mut().find(|b| b.id == booking_id) {
                        b.status = BookingStatus::Cancelled;
                    }
                },
                async move { backend.cancel_booking(&caller, booking_id).await },
                move |list, updated: &BookingDetail| {
                    if let Some(b) = list.iter_mut().find(|b| b.id == updated.id) {
                        *b = updated.clone();
                    }
                    cache.put(CACHE_NAME, &*list);
                },
            )
            .await;

        if let Err(e) = &result {
            tracing::info!("Cancel of booking {} failed: {}", booking_id, e);
            if matches!(e.kind(), ErrorKind::Conflict | ErrorKind::NotFound) {
                self.cache.invalidate(CACHE_NAME);
                if let Err(reload) = self.refresh(ctx).await {
                    tracing::warn!("Reload after refused cancel failed: {}", reload);
                }
            }
        }
        result
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemorySnapshotStore;
    use chocoo_core::models::{ClientProfile, Role, Service, Slot, SlotStatus};
    use chocoo_core::time::FixedClock;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use std::sync::Mutex;

    struct FakeBackend {
        list: Mutex<Vec<BookingDetail>>,
        cancel_error: Option<ClientError>,
    }

    #[async_trait]
    impl BookingsBackend for FakeBackend {
        async fn my_bookings(
            &self,
            _ctx: &CallerContext,
        ) -> Result<Vec<BookingDetail>, ClientError> {
            Ok(self.list.lock().unwrap().clone())
        }

        async fn cancel_booking(
            &self,
            _ctx: &CallerContext,
            booking_id: i64,
        ) -> Result<BookingDetail, ClientError> {
            tokio::task::yield_now().await;
            if let Some(e) = &self.cancel_error {
                return Err(e.clone());
            }
            let mut list = self.list.lock().unwrap();
            let b = list
                .iter_mut()
                .find(|b| b.id == booking_id)
                .ok_or(ClientError::Api {
                    status: 404,
                    message: "Запись не найдена".into(),
                })?;
            b.status = BookingStatus::Cancelled;
            Ok(b.clone())
        }
    }

    fn make_booking(id: i64) -> BookingDetail {
        let date = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
        BookingDetail {
            id,
            status: BookingStatus::Confirmed,
            remind_before_hours: 2,
            reminded: false,
            created_at: date.and_hms_opt(8, 0, 0).unwrap(),
            client: ClientProfile {
                id: 1,
                telegram_id: 1001,
                first_name: Some("Анна".into()),
                username: None,
                phone: Some("+375291234567".into()),
                instagram: None,
                consent_given: true,
                role: Role::Client,
            },
            service: Service {
                id: 1,
                name: "Чистка лица".into(),
                short_description: String::new(),
                description: String::new(),
                duration_minutes: 60,
                price: 80,
                is_active: true,
            },
            slot: Slot {
                id: id * 10,
                date,
                start_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
                status: SlotStatus::Booked,
            },
        }
    }

    fn make_ctx() -> CallerContext {
        CallerContext {
            init_data: "hash=x".into(),
            telegram_id: 1001,
            role: Role::Client,
        }
    }

    fn make_view(cancel_error: Option<ClientError>) -> (MyBookings, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend {
            list: Mutex::new(vec![make_booking(41), make_booking(42)]),
            cancel_error,
        });
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap(),
        ));
        let cache = SwrCache::new(Arc::new(MemorySnapshotStore::new()), clock);
        (MyBookings::new(backend.clone(), cache), backend)
    }

    fn status_of(view: &MyBookings, id: i64) -> Option<BookingStatus> {
        view.bookings().iter().find(|b| b.id == id).map(|b| b.status)
    }

    #[tokio::test]
    async fn test_refresh_loads_list() {
        let (view, _) = make_view(None);
        let list = view.refresh(&make_ctx()).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(view.bookings(), list);
    }

    #[tokio::test]
    async fn test_cancel_flips_status_at_once() {
        let view = Arc::new(make_view(None).0);
        view.refresh(&make_ctx()).await.unwrap();

        let pending = {
            let view = view.clone();
            tokio::spawn(async move { view.cancel(&make_ctx(), 42).await })
        };
        while status_of(&view, 42) != Some(BookingStatus::Cancelled) {
            tokio::task::yield_now().await;
        }

        let detail = pending.await.unwrap().unwrap();
        assert_eq!(detail.status, BookingStatus::Cancelled);
        assert_eq!(status_of(&view, 42), Some(BookingStatus::Cancelled));
        assert_eq!(status_of(&view, 41), Some(BookingStatus::Confirmed));
    }

    #[tokio::test]
    async fn test_failed_cancel_reverts_and_reports() {
        let (view, _) = make_view(Some(ClientError::Network("connection reset".into())));
        view.refresh(&make_ctx()).await.unwrap();
        let before = view.bookings();

        let err = view.cancel(&make_ctx(), 42).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(status_of(&view, 42), Some(BookingStatus::Confirmed));
        assert_eq!(view.bookings(), before);
    }

    #[tokio::test]
    async fn test_refused_cancel_reloads_server_state() {
        let (view, backend) = make_view(Some(ClientError::Api {
            status: 409,
            message: "Запись уже отменена".into(),
        }));
        view.refresh(&make_ctx()).await.unwrap();
        assert_eq!(status_of(&view, 42), Some(BookingStatus::Confirmed));

        // The master cancelled it in the meantime
        backend.list.lock().unwrap()[1].status = BookingStatus::Cancelled;

        let err = view.cancel(&make_ctx(), 42).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(status_of(&view, 42), Some(BookingStatus::Cancelled));
        assert_eq!(status_of(&view, 41), Some(BookingStatus::Confirmed));
    }
}
