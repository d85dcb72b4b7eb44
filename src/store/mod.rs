//! Persistence collaborators.
//!
//! The engine only sees the traits below. Each call is a single-document
//! (or single bulk) operation; there are no multi-document transactions.

mod durable;
mod memory;
mod wal;

pub use durable::WalStore;
pub use memory::InMemoryStore;
pub use wal::Wal;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::identity::UserProfile;
use crate::model::{Area, Booking, Visit, Visitor};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("WAL error: {0}")]
    Wal(String),
}

// ── Filters ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AreaFilter {
    pub location: Option<String>,
}

impl AreaFilter {
    pub fn matches(&self, area: &Area) -> bool {
        self.location.as_ref().is_none_or(|l| &area.location == l)
    }
}

/// Conjunction of optional predicates over bookings. The default matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub id: Option<Ulid>,
    pub user: Option<String>,
    pub area: Option<String>,
    pub date: Option<NaiveDate>,
    pub date_on_or_before: Option<NaiveDate>,
}

impl BookingFilter {
    pub fn id(mut self, id: Ulid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn area(mut self, area: impl Into<String>) -> Self {
        self.area = Some(area.into());
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn on_or_before(mut self, date: NaiveDate) -> Self {
        self.date_on_or_before = Some(date);
        self
    }

    pub fn matches(&self, b: &Booking) -> bool {
        self.id.is_none_or(|id| b.id == id)
            && self.user.as_ref().is_none_or(|u| &b.user == u)
            && self.area.as_ref().is_none_or(|a| &b.area == a)
            && self.date.is_none_or(|d| b.date == d)
            && self.date_on_or_before.is_none_or(|d| b.date <= d)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitFilter {
    pub id: Option<Ulid>,
    pub user: Option<String>,
    pub date: Option<NaiveDate>,
    pub date_on_or_before: Option<NaiveDate>,
}

impl VisitFilter {
    pub fn id(mut self, id: Ulid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn on_or_before(mut self, date: NaiveDate) -> Self {
        self.date_on_or_before = Some(date);
        self
    }

    pub fn matches(&self, v: &Visit) -> bool {
        self.id.is_none_or(|id| v.id == id)
            && self.user.as_ref().is_none_or(|u| &v.user == u)
            && self.date.is_none_or(|d| v.date == d)
            && self.date_on_or_before.is_none_or(|d| v.date <= d)
    }
}

// ── Collaborator traits ─────────────────────────────────────────

#[async_trait]
pub trait AreaStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Area>, StoreError>;
    async fn find(&self, filter: &AreaFilter) -> Result<Vec<Area>, StoreError>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn find(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError>;
    async fn count(&self, filter: &BookingFilter) -> Result<u64, StoreError>;
    async fn insert(&self, booking: Booking) -> Result<(), StoreError>;
    /// Remove every matching booking, returning how many went away.
    async fn delete(&self, filter: &BookingFilter) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait VisitStore: Send + Sync {
    async fn find(&self, filter: &VisitFilter) -> Result<Vec<Visit>, StoreError>;
    async fn count(&self, filter: &VisitFilter) -> Result<u64, StoreError>;
    async fn insert(&self, visit: Visit) -> Result<(), StoreError>;
    async fn delete(&self, filter: &VisitFilter) -> Result<u64, StoreError>;
    /// Flip the acceptance flag. Returns false if the visit does not exist.
    async fn mark_accepted(&self, id: Ulid) -> Result<bool, StoreError>;
}

/// Profiles users saved about themselves, keyed by identity-provider user id.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;
    /// Insert or replace the profile of `user_id`.
    async fn upsert_profile(&self, user_id: &str, profile: UserProfile) -> Result<(), StoreError>;
}

/// Standalone visitor directory, independent of scheduled visits.
#[async_trait]
pub trait VisitorStore: Send + Sync {
    async fn get_visitor(&self, id: Ulid) -> Result<Option<Visitor>, StoreError>;
    async fn insert_visitor(&self, visitor: Visitor) -> Result<(), StoreError>;
}

/// Where the admin roster is loaded from.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load_location_managers(&self) -> Result<Vec<String>, StoreError>;
}

/// The set of collaborators the engine talks to.
#[derive(Clone)]
pub struct Stores {
    pub areas: Arc<dyn AreaStore>,
    pub bookings: Arc<dyn BookingStore>,
    pub visits: Arc<dyn VisitStore>,
    pub settings: Arc<dyn SettingsSource>,
    pub users: Arc<dyn UserStore>,
    pub visitors: Arc<dyn VisitorStore>,
}

impl Stores {
    /// Use one backend for every collaborator.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: AreaStore + BookingStore + VisitStore + SettingsSource + UserStore + VisitorStore + 'static,
    {
        Self {
            areas: store.clone(),
            bookings: store.clone(),
            visits: store.clone(),
            settings: store.clone(),
            users: store.clone(),
            visitors: store,
        }
    }
}
