use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::identity::UserProfile;

/// Calendar dates travel as naive `YYYY-MM-DD` strings.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

/// A bookable area with a fixed number of seats per calendar date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    /// Max reservations per calendar date.
    pub capacity: u32,
    #[serde(default)]
    pub location: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// One user's claim on one area for one date.
///
/// `area_data` is the area as it looked at admission time and is never
/// refreshed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user: String,
    /// Email of the owner, captured at admission.
    pub user_name: String,
    pub area: String,
    pub date: NaiveDate,
    pub area_data: Area,
}

/// Booking request as received from a client. Either `dates` or a
/// `start`/`end` pair must be supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub area: String,
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub include_weekend: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company: String,
}

/// Names a user saves about themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visitor {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub created_by: String,
}

impl Visitor {
    pub fn from_contact(contact: VisitorContact, created_by: &str) -> Self {
        Self {
            id: Ulid::new(),
            first_name: contact.first_name,
            last_name: contact.last_name,
            email: contact.email,
            phone: contact.phone,
            company: contact.company,
            created_by: created_by.to_string(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// The employee hosting a visit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supervisor {
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub id: Ulid,
    pub visitor: Visitor,
    pub date: NaiveDate,
    pub additional_info: String,
    pub needs_parking_space: bool,
    /// Id of the user who scheduled the visit.
    pub user: String,
    pub supervisor: Supervisor,
    pub has_accepted: bool,
}

impl Visit {
    /// The view a guest gets through an invitation link.
    pub fn redacted(mut self) -> Self {
        self.additional_info.clear();
        self.needs_parking_space = false;
        self.user.clear();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRequest {
    pub visitor: VisitorContact,
    pub date: String,
    #[serde(default)]
    pub additional_info: String,
    #[serde(default)]
    pub needs_parking_space: bool,
}

// ── Derived views ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastItem {
    pub date: NaiveDate,
    pub booked_seats: u32,
    pub booked_by_myself: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forecast {
    pub created_at: DateTime<Utc>,
    pub bookings: Vec<ForecastItem>,
    pub area: Area,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayOverview {
    pub date: NaiveDate,
    pub visits: Vec<Visit>,
    pub bookings: Vec<Booking>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactItem {
    pub date: NaiveDate,
    pub email: String,
    pub area_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactReport {
    #[serde(rename = "for")]
    pub subject: String,
    pub created_at: DateTime<Utc>,
    pub not_before: NaiveDate,
    pub not_after: NaiveDate,
    pub data: Vec<ContactItem>,
}

/// The WAL record format. Each variant is one document-level mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AreaUpserted(Area),
    BookingInserted(Booking),
    BookingsDeleted { ids: Vec<Ulid> },
    VisitInserted(Visit),
    VisitAccepted { id: Ulid },
    VisitsDeleted { ids: Vec<Ulid> },
    SettingsReplaced { location_managers: Vec<String> },
    ProfileUpserted { user_id: String, profile: UserProfile },
    VisitorAdded(Visitor),
}
