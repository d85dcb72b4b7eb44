use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::identity::Identity;
use crate::limits::{DEFAULT_FORECAST_DAYS, MAX_FORECAST_DAYS, MIN_FORECAST_DAYS};
use crate::model::{Forecast, ForecastItem};
use crate::observability::STORE_READ_FAILURES_TOTAL;
use crate::store::BookingFilter;

use super::expand::business_days;
use super::{Engine, EngineError};

/// Number of business days a forecast covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon(u32);

impl Horizon {
    pub fn new(days: i64) -> Result<Self, EngineError> {
        if !(i64::from(MIN_FORECAST_DAYS)..=i64::from(MAX_FORECAST_DAYS)).contains(&days) {
            return Err(EngineError::invalid(format!(
                "days-in-future must be in range {MIN_FORECAST_DAYS} to {MAX_FORECAST_DAYS}"
            )));
        }
        Ok(Self(days as u32))
    }

    /// A missing or blank value means the default horizon.
    pub fn parse(raw: Option<&str>) -> Result<Self, EngineError> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(Self::default()),
            Some(s) => {
                let days: i64 = s
                    .parse()
                    .map_err(|_| EngineError::invalid("cannot parse days-in-future query parameter"))?;
                Self::new(days)
            }
        }
    }

    pub fn days(self) -> u32 {
        self.0
    }
}

impl Default for Horizon {
    fn default() -> Self {
        Self(DEFAULT_FORECAST_DAYS)
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Engine {
    /// Occupancy of `area_id` on the next `horizon` business days, today
    /// included when it is one. Read path: count and booking-set failures
    /// degrade to zero/unflagged entries.
    pub async fn forecast(
        &self,
        who: &Identity,
        area_id: &str,
        horizon: Horizon,
    ) -> Result<Forecast, EngineError> {
        let area = self.load_area(area_id).await?;

        let mine: HashSet<_> = match self
            .store_call(self.stores.bookings.find(&BookingFilter::default().user(who.user_id.as_str())))
            .await
        {
            Ok(bookings) => bookings.into_iter().map(|b| b.date).collect(),
            Err(e) => {
                tracing::error!(user = %who.user_id, error = %e, "loading own bookings failed");
                metrics::counter!(STORE_READ_FAILURES_TOTAL, "path" => "forecast").increment(1);
                HashSet::new()
            }
        };

        let mut entries = BTreeMap::new();
        for date in business_days(self.clock.today(), horizon.days() as usize) {
            let booked_seats = self.occupancy(&area.id, date).await;
            tracing::trace!(area = %area.id, %date, booked_seats, "forecast for date");
            entries.insert(
                date,
                ForecastItem {
                    date,
                    booked_seats,
                    booked_by_myself: mine.contains(&date),
                },
            );
        }

        Ok(Forecast {
            created_at: self.clock.now(),
            bookings: entries.into_values().collect(),
            area,
        })
    }
}
