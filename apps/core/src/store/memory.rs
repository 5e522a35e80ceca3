use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::SchedulingStore;
use crate::error::{Conflict, StoreError};
use crate::models::*;

/// Mutex-guarded maps. Each trait method holds the lock for its whole
/// check-and-write, which gives the same all-or-nothing semantics as a
/// database transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    services: BTreeMap<i64, Service>,
    clients: BTreeMap<i64, ClientProfile>,
    slots: BTreeMap<i64, Slot>,
    bookings: BTreeMap<i64, Booking>,
    templates: Vec<ScheduleTemplate>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn detail(&self, booking: &Booking) -> Result<BookingDetail, StoreError> {
        let client = self
            .clients
            .get(&booking.client_id)
            .ok_or_else(|| StoreError::not_found("client", booking.client_id))?;
        let service = self
            .services
            .get(&booking.service_id)
            .ok_or_else(|| StoreError::not_found("service", booking.service_id))?;
        let slot = self
            .slots
            .get(&booking.slot_id)
            .ok_or_else(|| StoreError::not_found("slot", booking.slot_id))?;
        Ok(BookingDetail {
            id: booking.id,
            status: booking.status,
            remind_before_hours: booking.remind_before_hours,
            reminded: booking.reminded,
            created_at: booking.created_at,
            client: client.clone(),
            service: service.clone(),
            slot: slot.clone(),
        })
    }

    fn expect_slot(&self, slot_id: i64, expected: SlotStatus) -> Result<(), StoreError> {
        let slot = self
            .slots
            .get(&slot_id)
            .ok_or_else(|| StoreError::not_found("slot", slot_id))?;
        if slot.status != expected {
            return Err(StoreError::Conflict(Conflict::SlotState {
                slot_id,
                actual: slot.status,
            }));
        }
        Ok(())
    }

    fn expect_confirmed(&self, booking_id: i64, slot_id: i64) -> Result<(), StoreError> {
        let booking = self
            .bookings
            .get(&booking_id)
            .ok_or_else(|| StoreError::not_found("booking", booking_id))?;
        if booking.status != BookingStatus::Confirmed || booking.slot_id != slot_id {
            return Err(StoreError::Conflict(Conflict::BookingState { booking_id }));
        }
        Ok(())
    }

    fn set_slot(&mut self, slot_id: i64, status: SlotStatus) {
        if let Some(slot) = self.slots.get_mut(&slot_id) {
            slot.status = status;
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Assigns an id and stores the service.
    pub fn add_service(&self, mut service: Service) -> Service {
        let mut state = self.lock();
        service.id = state.next_id();
        state.services.insert(service.id, service.clone());
        service
    }

    pub fn set_service_active(&self, id: i64, active: bool) {
        if let Some(s) = self.lock().services.get_mut(&id) {
            s.is_active = active;
        }
    }

    pub fn add_client(&self, mut client: ClientProfile) -> ClientProfile {
        let mut state = self.lock();
        client.id = state.next_id();
        state.clients.insert(client.id, client.clone());
        client
    }

    pub fn add_template(&self, mut template: ScheduleTemplate) -> ScheduleTemplate {
        let mut state = self.lock();
        template.id = state.next_id();
        state.templates.push(template.clone());
        template
    }

    pub fn all_slots(&self) -> Vec<Slot> {
        self.lock().slots.values().cloned().collect()
    }

    pub fn all_bookings(&self) -> Vec<Booking> {
        self.lock().bookings.values().cloned().collect()
    }
}

#[async_trait]
impl SchedulingStore for MemoryStore {
    async fn service(&self, id: i64) -> Result<Option<Service>, StoreError> {
        Ok(self.lock().services.get(&id).cloned())
    }

    async fn client(&self, id: i64) -> Result<Option<ClientProfile>, StoreError> {
        Ok(self.lock().clients.get(&id).cloned())
    }

    async fn slot(&self, id: i64) -> Result<Option<Slot>, StoreError> {
        Ok(self.lock().slots.get(&id).cloned())
    }

    async fn slots_for_date(&self, date: NaiveDate) -> Result<Vec<Slot>, StoreError> {
        let mut slots: Vec<Slot> = self
            .lock()
            .slots
            .values()
            .filter(|s| s.date == date)
            .cloned()
            .collect();
        slots.sort_by_key(|s| s.start_time);
        Ok(slots)
    }

    async fn booking(&self, id: i64) -> Result<Option<Booking>, StoreError> {
        Ok(self.lock().bookings.get(&id).cloned())
    }

    async fn booking_detail(&self, id: i64) -> Result<Option<BookingDetail>, StoreError> {
        let state = self.lock();
        match state.bookings.get(&id) {
            Some(b) => state.detail(b).map(Some),
            None => Ok(None),
        }
    }

    async fn confirmed_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<BookingDetail>, StoreError> {
        let state = self.lock();
        let mut details = Vec::new();
        for booking in state.bookings.values() {
            if booking.status != BookingStatus::Confirmed {
                continue;
            }
            let detail = state.detail(booking)?;
            if detail.slot.date >= from && detail.slot.date <= to {
                details.push(detail);
            }
        }
        details.sort_by_key(|d| (d.slot.date, d.slot.start_time));
        Ok(details)
    }

    async fn templates(&self) -> Result<Vec<ScheduleTemplate>, StoreError> {
        let mut templates = self.lock().templates.clone();
        templates.sort_by_key(|t| t.day_of_week);
        Ok(templates)
    }

    async fn insert_slots(
        &self,
        date: NaiveDate,
        drafts: &[SlotDraft],
    ) -> Result<Vec<Slot>, StoreError> {
        let mut state = self.lock();
        if state.slots.values().any(|s| s.date == date) {
            return Err(StoreError::AlreadyGenerated(date));
        }
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let slot = Slot {
                id: state.next_id(),
                date,
                start_time: draft.start_time,
                end_time: draft.end_time,
                status: SlotStatus::Available,
            };
            state.slots.insert(slot.id, slot.clone());
            created.push(slot);
        }
        Ok(created)
    }

    async fn book_slot(&self, draft: &BookingDraft) -> Result<Booking, StoreError> {
        let mut state = self.lock();
        let active = state
            .services
            .get(&draft.service_id)
            .ok_or_else(|| StoreError::not_found("service", draft.service_id))?
            .is_active;
        if !active {
            return Err(StoreError::Conflict(Conflict::ServiceInactive {
                service_id: draft.service_id,
            }));
        }
        state.expect_slot(draft.slot_id, SlotStatus::Available)?;

        let booking = Booking {
            id: state.next_id(),
            client_id: draft.client_id,
            service_id: draft.service_id,
            slot_id: draft.slot_id,
            status: BookingStatus::Confirmed,
            remind_before_hours: draft.remind_before_hours,
            reminded: false,
            created_at: draft.created_at,
        };
        state.set_slot(draft.slot_id, SlotStatus::Booked);
        state.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn release_booking(&self, booking_id: i64, slot_id: i64) -> Result<Booking, StoreError> {
        let mut state = self.lock();
        state.expect_confirmed(booking_id, slot_id)?;
        state.expect_slot(slot_id, SlotStatus::Booked)?;

        state.set_slot(slot_id, SlotStatus::Available);
        let booking = state
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| StoreError::not_found("booking", booking_id))?;
        booking.status = BookingStatus::Cancelled;
        Ok(booking.clone())
    }

    async fn move_booking(
        &self,
        booking_id: i64,
        from_slot: i64,
        to_slot: i64,
    ) -> Result<Booking, StoreError> {
        let mut state = self.lock();
        state.expect_confirmed(booking_id, from_slot)?;
        state.expect_slot(to_slot, SlotStatus::Available)?;
        state.expect_slot(from_slot, SlotStatus::Booked)?;

        state.set_slot(to_slot, SlotStatus::Booked);
        state.set_slot(from_slot, SlotStatus::Available);
        let booking = state
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| StoreError::not_found("booking", booking_id))?;
        booking.slot_id = to_slot;
        Ok(booking.clone())
    }

    async fn set_slot_status(
        &self,
        slot_id: i64,
        expected: SlotStatus,
        next: SlotStatus,
    ) -> Result<Slot, StoreError> {
        let mut state = self.lock();
        state.expect_slot(slot_id, expected)?;
        state.set_slot(slot_id, next);
        state
            .slots
            .get(&slot_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("slot", slot_id))
    }

    async fn complete_booking(&self, booking_id: i64) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.bookings.get_mut(&booking_id) {
            Some(b) if b.status == BookingStatus::Confirmed => {
                b.status = BookingStatus::Completed;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("booking", booking_id)),
        }
    }

    async fn mark_reminded(&self, booking_id: i64) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.bookings.get_mut(&booking_id) {
            Some(b) if b.status == BookingStatus::Confirmed && !b.reminded => {
                b.reminded = true;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("booking", booking_id)),
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::hm;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn make_service(store: &MemoryStore) -> Service {
        store.add_service(Service {
            id: 0,
            name: "Чистка лица".into(),
            short_description: String::new(),
            description: String::new(),
            duration_minutes: 60,
            price: 90,
            is_active: true,
        })
    }

    fn make_client(store: &MemoryStore) -> ClientProfile {
        store.add_client(ClientProfile {
            id: 0,
            telegram_id: 555,
            first_name: Some("Анна".into()),
            username: None,
            phone: Some("+375291234567".into()),
            instagram: None,
            consent_given: true,
            role: Role::Client,
        })
    }

    async fn make_slots(store: &MemoryStore, n: u32) -> Vec<Slot> {
        let drafts: Vec<SlotDraft> = (0..n)
            .map(|i| SlotDraft {
                start_time: hm(10 + i, 0),
                end_time: hm(10 + i, 30),
            })
            .collect();
        store.insert_slots(day(), &drafts).await.unwrap()
    }

    fn draft(client: &ClientProfile, service: &Service, slot: &Slot) -> BookingDraft {
        BookingDraft {
            client_id: client.id,
            service_id: service.id,
            slot_id: slot.id,
            remind_before_hours: 2,
            created_at: day().and_time(hm(8, 0)),
        }
    }

    #[tokio::test]
    async fn test_insert_slots_refuses_populated_date() {
        let store = MemoryStore::new();
        let slots = make_slots(&store, 2).await;
        let again = store
            .insert_slots(
                day(),
                &[SlotDraft {
                    start_time: hm(18, 0),
                    end_time: hm(18, 30),
                }],
            )
            .await;
        assert_eq!(again, Err(StoreError::AlreadyGenerated(day())));
        assert_eq!(store.slots_for_date(day()).await.unwrap(), slots);
    }

    #[tokio::test]
    async fn test_book_slot_second_attempt_conflicts() {
        let store = MemoryStore::new();
        let service = make_service(&store);
        let client = make_client(&store);
        let slot = make_slots(&store, 1).await.remove(0);

        let booking = store.book_slot(&draft(&client, &service, &slot)).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);

        let err = store
            .book_slot(&draft(&client, &service, &slot))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict(Conflict::SlotState {
                slot_id: slot.id,
                actual: SlotStatus::Booked
            })
        );
        assert_eq!(store.all_bookings().len(), 1);
    }

    #[tokio::test]
    async fn test_book_slot_inactive_service() {
        let store = MemoryStore::new();
        let service = make_service(&store);
        let client = make_client(&store);
        let slot = make_slots(&store, 1).await.remove(0);
        store.set_service_active(service.id, false);

        let err = store
            .book_slot(&draft(&client, &service, &slot))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict(Conflict::ServiceInactive { .. })
        ));
        assert_eq!(
            store.slot(slot.id).await.unwrap().unwrap().status,
            SlotStatus::Available
        );
    }

    #[tokio::test]
    async fn test_move_booking_failure_changes_nothing() {
        let store = MemoryStore::new();
        let service = make_service(&store);
        let client = make_client(&store);
        let slots = make_slots(&store, 2).await;
        let booking = store
            .book_slot(&draft(&client, &service, &slots[0]))
            .await
            .unwrap();
        store
            .set_slot_status(slots[1].id, SlotStatus::Available, SlotStatus::Blocked)
            .await
            .unwrap();

        let before = (store.all_slots(), store.all_bookings());
        let err = store
            .move_booking(booking.id, slots[0].id, slots[1].id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::SlotState { .. })));
        assert_eq!((store.all_slots(), store.all_bookings()), before);
    }

    #[tokio::test]
    async fn test_release_then_release_again() {
        let store = MemoryStore::new();
        let service = make_service(&store);
        let client = make_client(&store);
        let slot = make_slots(&store, 1).await.remove(0);
        let booking = store.book_slot(&draft(&client, &service, &slot)).await.unwrap();

        let released = store.release_booking(booking.id, slot.id).await.unwrap();
        assert_eq!(released.status, BookingStatus::Cancelled);
        assert_eq!(
            store.slot(slot.id).await.unwrap().unwrap().status,
            SlotStatus::Available
        );

        let err = store.release_booking(booking.id, slot.id).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict(Conflict::BookingState {
                booking_id: booking.id
            })
        );
    }

    #[tokio::test]
    async fn test_mark_reminded_once() {
        let store = MemoryStore::new();
        let service = make_service(&store);
        let client = make_client(&store);
        let slot = make_slots(&store, 1).await.remove(0);
        let booking = store.book_slot(&draft(&client, &service, &slot)).await.unwrap();

        assert!(store.mark_reminded(booking.id).await.unwrap());
        assert!(!store.mark_reminded(booking.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_confirmed_between_filters_and_orders() {
        let store = MemoryStore::new();
        let service = make_service(&store);
        let client = make_client(&store);
        let slots = make_slots(&store, 3).await;
        let late = store.book_slot(&draft(&client, &service, &slots[2])).await.unwrap();
        let early = store.book_slot(&draft(&client, &service, &slots[0])).await.unwrap();
        let gone = store.book_slot(&draft(&client, &service, &slots[1])).await.unwrap();
        store.release_booking(gone.id, slots[1].id).await.unwrap();

        let found = store.confirmed_between(day(), day()).await.unwrap();
        assert_eq!(
            found.iter().map(|d| d.id).collect::<Vec<_>>(),
            vec![early.id, late.id]
        );
        assert_eq!(found[0].client.id, client.id);
    }
}
