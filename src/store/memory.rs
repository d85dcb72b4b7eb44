use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::identity::UserProfile;
use crate::model::*;

use super::{
    AreaFilter, AreaStore, BookingFilter, BookingStore, SettingsSource, StoreError, UserStore,
    VisitFilter, VisitStore, VisitorStore,
};

/// Document store held entirely in memory. Also the state behind [`super::WalStore`].
pub struct InMemoryStore {
    areas: DashMap<String, Area>,
    bookings: DashMap<Ulid, Booking>,
    visits: DashMap<Ulid, Visit>,
    visitors: DashMap<Ulid, Visitor>,
    profiles: DashMap<String, UserProfile>,
    location_managers: RwLock<Vec<String>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            areas: DashMap::new(),
            bookings: DashMap::new(),
            visits: DashMap::new(),
            visitors: DashMap::new(),
            profiles: DashMap::new(),
            location_managers: RwLock::new(Vec::new()),
        }
    }

    // ── Areas ────────────────────────────────────────────────

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn get_area(&self, id: &str) -> Option<Area> {
        self.areas.get(id).map(|e| e.value().clone())
    }

    pub fn upsert_area(&self, area: Area) {
        self.areas.insert(area.id.clone(), area);
    }

    pub fn find_areas(&self, filter: &AreaFilter) -> Vec<Area> {
        let mut out: Vec<Area> = self
            .areas
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    // ── Bookings ─────────────────────────────────────────────

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn find_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        if let Some(id) = filter.id {
            return self
                .bookings
                .get(&id)
                .filter(|b| filter.matches(b.value()))
                .map(|b| vec![b.value().clone()])
                .unwrap_or_default();
        }
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|b| (b.date, b.id));
        out
    }

    pub fn count_bookings(&self, filter: &BookingFilter) -> u64 {
        self.bookings.iter().filter(|e| filter.matches(e.value())).count() as u64
    }

    pub fn matching_booking_ids(&self, filter: &BookingFilter) -> Vec<Ulid> {
        self.bookings
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| *e.key())
            .collect()
    }

    pub fn insert_booking(&self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    pub fn remove_bookings(&self, ids: &[Ulid]) -> u64 {
        ids.iter().filter(|id| self.bookings.remove(id).is_some()).count() as u64
    }

    // ── Visits ───────────────────────────────────────────────

    pub fn find_visits(&self, filter: &VisitFilter) -> Vec<Visit> {
        let mut out: Vec<Visit> = self
            .visits
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|v| (v.date, v.id));
        out
    }

    pub fn count_visits(&self, filter: &VisitFilter) -> u64 {
        self.visits.iter().filter(|e| filter.matches(e.value())).count() as u64
    }

    pub fn matching_visit_ids(&self, filter: &VisitFilter) -> Vec<Ulid> {
        self.visits
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| *e.key())
            .collect()
    }

    pub fn contains_visit(&self, id: &Ulid) -> bool {
        self.visits.contains_key(id)
    }

    pub fn insert_visit(&self, visit: Visit) {
        self.visits.insert(visit.id, visit);
    }

    pub fn accept_visit(&self, id: &Ulid) -> bool {
        match self.visits.get_mut(id) {
            Some(mut v) => {
                v.has_accepted = true;
                true
            }
            None => false,
        }
    }

    pub fn remove_visits(&self, ids: &[Ulid]) -> u64 {
        ids.iter().filter(|id| self.visits.remove(id).is_some()).count() as u64
    }

    // ── Visitor directory ────────────────────────────────────

    pub fn visitor(&self, id: &Ulid) -> Option<Visitor> {
        self.visitors.get(id).map(|v| v.value().clone())
    }

    pub fn add_visitor(&self, visitor: Visitor) {
        self.visitors.insert(visitor.id, visitor);
    }

    // ── Profiles ─────────────────────────────────────────────

    pub fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.get(user_id).map(|p| p.value().clone())
    }

    pub fn put_profile(&self, user_id: &str, profile: UserProfile) {
        self.profiles.insert(user_id.to_string(), profile);
    }

    // ── Settings ─────────────────────────────────────────────

    pub fn replace_settings(&self, location_managers: Vec<String>) {
        *self
            .location_managers
            .write()
            .unwrap_or_else(|e| e.into_inner()) = location_managers;
    }

    pub fn location_managers(&self) -> Vec<String> {
        self.location_managers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::AreaUpserted(area) => self.upsert_area(area.clone()),
            Event::BookingInserted(booking) => self.insert_booking(booking.clone()),
            Event::BookingsDeleted { ids } => {
                self.remove_bookings(ids);
            }
            Event::VisitInserted(visit) => self.insert_visit(visit.clone()),
            Event::VisitAccepted { id } => {
                self.accept_visit(id);
            }
            Event::VisitsDeleted { ids } => {
                self.remove_visits(ids);
            }
            Event::SettingsReplaced { location_managers } => {
                self.replace_settings(location_managers.clone())
            }
            Event::ProfileUpserted { user_id, profile } => self.put_profile(user_id, profile.clone()),
            Event::VisitorAdded(visitor) => self.add_visitor(visitor.clone()),
        }
    }

    /// Minimal event sequence that recreates the current state.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.areas.len()
                + self.profiles.len()
                + self.visitors.len()
                + self.bookings.len()
                + self.visits.len()
                + 1,
        );
        events.extend(self.find_areas(&AreaFilter::default()).into_iter().map(Event::AreaUpserted));
        events.push(Event::SettingsReplaced {
            location_managers: self.location_managers(),
        });
        let mut profiles: Vec<(String, UserProfile)> = self
            .profiles
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        profiles.sort_by(|a, b| a.0.cmp(&b.0));
        events.extend(
            profiles
                .into_iter()
                .map(|(user_id, profile)| Event::ProfileUpserted { user_id, profile }),
        );
        let mut visitors: Vec<Visitor> = self.visitors.iter().map(|e| e.value().clone()).collect();
        visitors.sort_by_key(|v| v.id);
        events.extend(visitors.into_iter().map(Event::VisitorAdded));
        events.extend(
            self.find_bookings(&BookingFilter::default())
                .into_iter()
                .map(Event::BookingInserted),
        );
        events.extend(
            self.find_visits(&VisitFilter::default())
                .into_iter()
                .map(Event::VisitInserted),
        );
        events
    }
}

#[async_trait]
impl AreaStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Area>, StoreError> {
        Ok(self.get_area(id))
    }

    async fn find(&self, filter: &AreaFilter) -> Result<Vec<Area>, StoreError> {
        Ok(self.find_areas(filter))
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn find(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        Ok(self.find_bookings(filter))
    }

    async fn count(&self, filter: &BookingFilter) -> Result<u64, StoreError> {
        Ok(self.count_bookings(filter))
    }

    async fn insert(&self, booking: Booking) -> Result<(), StoreError> {
        self.insert_booking(booking);
        Ok(())
    }

    async fn delete(&self, filter: &BookingFilter) -> Result<u64, StoreError> {
        let ids = self.matching_booking_ids(filter);
        Ok(self.remove_bookings(&ids))
    }
}

#[async_trait]
impl VisitStore for InMemoryStore {
    async fn find(&self, filter: &VisitFilter) -> Result<Vec<Visit>, StoreError> {
        Ok(self.find_visits(filter))
    }

    async fn count(&self, filter: &VisitFilter) -> Result<u64, StoreError> {
        Ok(self.count_visits(filter))
    }

    async fn insert(&self, visit: Visit) -> Result<(), StoreError> {
        self.insert_visit(visit);
        Ok(())
    }

    async fn delete(&self, filter: &VisitFilter) -> Result<u64, StoreError> {
        let ids = self.matching_visit_ids(filter);
        Ok(self.remove_visits(&ids))
    }

    async fn mark_accepted(&self, id: Ulid) -> Result<bool, StoreError> {
        Ok(self.accept_visit(&id))
    }
}

#[async_trait]
impl SettingsSource for InMemoryStore {
    async fn load_location_managers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.location_managers())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profile(user_id))
    }

    async fn upsert_profile(&self, user_id: &str, profile: UserProfile) -> Result<(), StoreError> {
        self.put_profile(user_id, profile);
        Ok(())
    }
}

#[async_trait]
impl VisitorStore for InMemoryStore {
    async fn get_visitor(&self, id: Ulid) -> Result<Option<Visitor>, StoreError> {
        Ok(self.visitor(&id))
    }

    async fn insert_visitor(&self, visitor: Visitor) -> Result<(), StoreError> {
        self.add_visitor(visitor);
        Ok(())
    }
}
