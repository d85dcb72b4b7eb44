use chrono::NaiveDate;
use ulid::Ulid;

use crate::identity::Identity;
use crate::limits::MAX_ID_LEN;
use crate::model::{Area, Booking, BookingRequest};
use crate::notify::Notice;
use crate::observability::{ADMISSION_REJECTED_TOTAL, BOOKINGS_ADMITTED_TOTAL};
use crate::store::BookingFilter;

use super::availability::admits;
use super::expand::expand_request;
use super::{AdmissionKey, Engine, EngineError};

/// What happened to one date of a request.
enum Step {
    Committed(Booking),
    Duplicate,
}

fn reject(reason: &'static str) {
    metrics::counter!(ADMISSION_REJECTED_TOTAL, "reason" => reason).increment(1);
}

impl Engine {
    /// Booking Admission Engine.
    ///
    /// Validation happens before any write and reports every problem at once.
    /// Dates are then admitted in ascending order, each under the locks of
    /// its `(area, date)` and `(user, date)` keys:
    ///
    /// - no seat left: the request stops there with `NoCapacity`; bookings
    ///   already made for earlier dates stay.
    /// - the user already holds a booking that day (any area): the date is
    ///   skipped and the rest are still tried; the request then ends with
    ///   `AlreadyCheckedIn`.
    ///
    /// Both conflicts carry the ids this request did commit. Any other
    /// failure after the first commit is wrapped in `Interrupted` so those
    /// ids are not lost either.
    pub async fn create_bookings(
        &self,
        who: &Identity,
        request: &BookingRequest,
    ) -> Result<Vec<Booking>, EngineError> {
        let dates = self.validate_booking_request(request).inspect_err(|_| reject("invalid"))?;
        let area = self.load_area(request.area.trim()).await?;

        let mut committed: Vec<Booking> = Vec::with_capacity(dates.len());
        let mut duplicates = Vec::new();
        for date in dates {
            let step = match self.admit_one(who, &area, date, &committed).await {
                Ok(step) => step,
                Err(e) if committed.is_empty() || !e.committed().is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(user = %who.user_id, area = %area.id, %date, committed = committed.len(), error = %e, "admission interrupted");
                    return Err(EngineError::Interrupted {
                        source: Box::new(e),
                        committed: committed.iter().map(|b| b.id).collect(),
                    });
                }
            };
            match step {
                Step::Committed(booking) => committed.push(booking),
                Step::Duplicate => duplicates.push(date),
            }
        }

        if !duplicates.is_empty() {
            reject("duplicate");
            tracing::info!(user = %who.user_id, area = %area.id, ?duplicates, "already checked in");
            return Err(EngineError::AlreadyCheckedIn {
                dates: duplicates,
                committed: committed.iter().map(|b| b.id).collect(),
            });
        }
        Ok(committed)
    }

    fn validate_booking_request(&self, request: &BookingRequest) -> Result<Vec<NaiveDate>, EngineError> {
        let mut errors = Vec::new();
        let area = request.area.trim();
        if area.is_empty() {
            errors.push("area is required".to_string());
        } else if area.len() > MAX_ID_LEN {
            errors.push(format!("area id must be at most {MAX_ID_LEN} characters"));
        }

        let dates = match expand_request(
            &request.dates,
            request.start.as_deref(),
            request.end.as_deref(),
            request.include_weekend,
        ) {
            Ok(dates) => dates,
            Err(EngineError::InvalidInput(errs)) => {
                errors.extend(errs);
                Vec::new()
            }
            Err(other) => return Err(other),
        };

        let today = self.clock.today();
        for date in dates.iter().filter(|d| **d < today) {
            errors.push(format!(
                "date {date} is in the past. you have to book a date in the future or today"
            ));
        }

        if errors.is_empty() {
            Ok(dates)
        } else {
            Err(EngineError::InvalidInput(errors))
        }
    }

    async fn admit_one(
        &self,
        who: &Identity,
        area: &Area,
        date: NaiveDate,
        committed: &[Booking],
    ) -> Result<Step, EngineError> {
        let guard = self
            .locks
            .acquire(vec![
                AdmissionKey::Area(area.id.clone(), date),
                AdmissionKey::User(who.user_id.clone(), date),
            ])
            .await;

        let taken = self.try_occupancy(&area.id, date).await?;
        if !admits(taken, area.capacity) {
            reject("no_capacity");
            tracing::info!(user = %who.user_id, area = %area.id, %date, taken, capacity = area.capacity, "no capacity");
            return Err(EngineError::NoCapacity {
                area: area.id.clone(),
                date,
                committed: committed.iter().map(|b| b.id).collect(),
            });
        }

        let mine = BookingFilter::default().user(who.user_id.as_str()).on(date);
        if self.store_call(self.stores.bookings.count(&mine)).await? > 0 {
            return Ok(Step::Duplicate);
        }

        let booking = Booking {
            id: Ulid::new(),
            user: who.user_id.clone(),
            user_name: who.email.clone(),
            area: area.id.clone(),
            date,
            area_data: area.clone(),
        };
        let bookings = self.stores.bookings.clone();
        let row = booking.clone();
        self.store_write(guard, async move { bookings.insert(row).await }).await?;
        metrics::counter!(BOOKINGS_ADMITTED_TOTAL).increment(1);
        tracing::debug!(user = %who.user_id, area = %area.id, %date, id = %booking.id, "booking admitted");
        self.notify.send(Notice::BookingCreated(booking.clone()));
        Ok(Step::Committed(booking))
    }

    /// Delete one of the caller's own bookings. `false` when nothing matched.
    pub async fn delete_booking(&self, who: &Identity, id: Ulid) -> Result<bool, EngineError> {
        let filter = BookingFilter::default().id(id).user(who.user_id.as_str());
        let found = self.store_call(self.stores.bookings.find(&filter)).await?;
        let Some(booking) = found.into_iter().next() else {
            return Ok(false);
        };

        let guard = self
            .locks
            .acquire(vec![AdmissionKey::Area(booking.area.clone(), booking.date)])
            .await;
        let bookings = self.stores.bookings.clone();
        let removed = self
            .store_write(guard, async move { bookings.delete(&filter).await })
            .await?;
        if removed > 0 {
            tracing::debug!(user = %who.user_id, %id, "booking deleted");
            self.notify.send(Notice::BookingDeleted {
                id,
                area: booking.area,
                date: booking.date,
            });
        }
        Ok(removed > 0)
    }

    /// Retention: drop every booking dated on or before `cutoff`.
    pub async fn purge_bookings_on_or_before(&self, cutoff: NaiveDate) -> Result<u64, EngineError> {
        let filter = BookingFilter::default().on_or_before(cutoff);
        let bookings = self.stores.bookings.clone();
        Ok(self
            .store_write((), async move { bookings.delete(&filter).await })
            .await?)
    }
}
