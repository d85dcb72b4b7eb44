use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::Area;
use crate::observability::STORE_READ_FAILURES_TOTAL;
use crate::store::BookingFilter;

use super::{Engine, EngineError};

// ── Availability Policy ─────────────────────────────────────────

/// Whether one more booking fits. Capacity 0 never admits.
pub fn admits(committed: u64, capacity: u32) -> bool {
    committed < u64::from(capacity)
}

/// Dates whose tally reaches `capacity`, ascending, each once.
///
/// Tallies above capacity (possible with data written by other processes)
/// are reported too.
pub fn full_dates<I>(dates: I, capacity: u32) -> Vec<NaiveDate>
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut tally: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for date in dates {
        *tally.entry(date).or_default() += 1;
    }
    tally
        .into_iter()
        .filter(|&(_, n)| !admits(n, capacity))
        .map(|(date, _)| date)
        .collect()
}

impl Engine {
    /// Resource directory lookup. A missing area is Not Found.
    pub(super) async fn load_area(&self, id: &str) -> Result<Area, EngineError> {
        self.store_call(self.stores.areas.get(id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("area {id}")))
    }

    /// Occupancy Counter, read path: store failures count as zero.
    pub async fn occupancy(&self, area: &str, date: NaiveDate) -> u32 {
        match self.try_occupancy(area, date).await {
            Ok(n) => u32::try_from(n).unwrap_or(u32::MAX),
            Err(e) => {
                tracing::error!(area, %date, error = %e, "counting bookings failed, reporting 0");
                metrics::counter!(STORE_READ_FAILURES_TOTAL, "path" => "occupancy").increment(1);
                0
            }
        }
    }

    /// Occupancy Counter, write path: store failures propagate.
    pub async fn try_occupancy(&self, area: &str, date: NaiveDate) -> Result<u64, EngineError> {
        let filter = BookingFilter::default().area(area).on(date);
        Ok(self.store_call(self.stores.bookings.count(&filter)).await?)
    }

    pub async fn is_bookable(&self, area_id: &str, date: NaiveDate) -> Result<bool, EngineError> {
        let area = self.load_area(area_id).await?;
        let committed = self.occupancy(area_id, date).await;
        Ok(admits(u64::from(committed), area.capacity))
    }

    /// Every date on which `area_id` has no seat left.
    pub async fn unavailable_dates(&self, area_id: &str) -> Result<Vec<NaiveDate>, EngineError> {
        let area = self.load_area(area_id).await?;
        let filter = BookingFilter::default().area(area_id);
        let bookings = self.store_call(self.stores.bookings.find(&filter)).await?;
        Ok(full_dates(bookings.iter().map(|b| b.date), area.capacity))
    }
}
