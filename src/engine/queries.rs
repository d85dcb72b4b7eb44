use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};

use crate::identity::Identity;
use crate::limits::CONTACT_TRACE_WINDOW_DAYS;
use crate::model::{Area, Booking, ContactItem, ContactReport, DayOverview};
use crate::store::{AreaFilter, BookingFilter, VisitFilter};

use super::{Engine, EngineError};

impl Engine {
    pub(super) async fn require_admin(&self, who: &Identity) -> Result<(), EngineError> {
        if self.admins.is_admin(&who.email).await {
            Ok(())
        } else {
            tracing::debug!(user = %who.user_id, "admin operation refused");
            Err(EngineError::Forbidden)
        }
    }

    pub async fn is_admin(&self, who: &Identity) -> bool {
        self.admins.is_admin(&who.email).await
    }

    pub async fn list_areas(&self, filter: &AreaFilter) -> Result<Vec<Area>, EngineError> {
        Ok(self.store_call(self.stores.areas.find(filter)).await?)
    }

    pub async fn get_area(&self, id: &str) -> Result<Area, EngineError> {
        self.load_area(id).await
    }

    pub async fn list_bookings(&self, who: &Identity) -> Result<Vec<Booking>, EngineError> {
        let filter = BookingFilter::default().user(who.user_id.as_str());
        Ok(self.store_call(self.stores.bookings.find(&filter)).await?)
    }

    pub async fn admin_list_bookings(&self, who: &Identity) -> Result<Vec<Booking>, EngineError> {
        self.require_admin(who).await?;
        Ok(self.store_call(self.stores.bookings.find(&BookingFilter::default())).await?)
    }

    pub async fn admin_day_overview(&self, who: &Identity, date: NaiveDate) -> Result<DayOverview, EngineError> {
        self.require_admin(who).await?;
        let bookings = self
            .store_call(self.stores.bookings.find(&BookingFilter::default().on(date)))
            .await?;
        let visits = self
            .store_call(self.stores.visits.find(&VisitFilter::default().on(date)))
            .await?;
        Ok(DayOverview { date, visits, bookings })
    }

    /// Who shared an area with `email` over the last two weeks.
    ///
    /// Covers `[today - 14 days, today]`. The subject's own bookings are not
    /// reported.
    pub async fn contact_trace(&self, who: &Identity, email: &str) -> Result<ContactReport, EngineError> {
        self.require_admin(who).await?;

        let email = email.trim().to_lowercase();
        if let Some(domain) = &self.options.contact_trace_domain
            && !email.ends_with(domain.as_str())
        {
            return Err(EngineError::invalid(format!("the mail address must end with {domain}")));
        }
        let subject = self
            .identity
            .lookup_by_email(&email)
            .await?
            .ok_or_else(|| EngineError::invalid(format!("no user is registered for {email}")))?;

        let not_after = self.clock.today();
        let not_before = not_after
            .checked_sub_days(Days::new(CONTACT_TRACE_WINDOW_DAYS))
            .unwrap_or(NaiveDate::MIN);

        let theirs = self
            .store_call(self.stores.bookings.find(&BookingFilter::default().user(subject.user_id.as_str())))
            .await?;
        let visited: BTreeSet<(NaiveDate, String)> = theirs
            .into_iter()
            .filter(|b| b.date >= not_before && b.date <= not_after)
            .map(|b| (b.date, b.area))
            .collect();

        let mut data = Vec::new();
        for (date, area) in visited {
            tracing::info!(%date, area = %area, "fetching data for backtracing");
            let filter = BookingFilter::default().area(area.as_str()).on(date);
            for other in self.store_call(self.stores.bookings.find(&filter)).await? {
                if other.user == subject.user_id || other.user_name.eq_ignore_ascii_case(&email) {
                    continue;
                }
                data.push(ContactItem {
                    date,
                    email: other.user_name,
                    area_name: other.area_data.name,
                });
            }
        }

        Ok(ContactReport {
            subject: email,
            created_at: self.clock.now(),
            not_before,
            not_after,
            data,
        })
    }

    /// Reload the admin roster from the settings store.
    pub async fn refresh_settings(&self) -> Result<usize, EngineError> {
        let managers = self.store_call(self.stores.settings.load_location_managers()).await?;
        let n = self.admins.replace(managers).await;
        tracing::info!(admins = n, "settings refreshed");
        Ok(n)
    }
}
