use std::collections::BTreeMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::identity::Identity;
use crate::limits::MAX_VISITS_PER_DAY;
use crate::model::{parse_date, Supervisor, Visit, VisitRequest, Visitor, VisitorContact};
use crate::notify::Notice;
use crate::observability::{VISITS_REJECTED_TOTAL, VISITS_SCHEDULED_TOTAL};
use crate::store::VisitFilter;

use super::{AdmissionKey, Engine, EngineError};

fn visit_not_found(id: Ulid) -> EngineError {
    EngineError::NotFound(format!("visit {id}"))
}

fn visitor_email_required(contact: &VisitorContact, errors: &mut Vec<String>) {
    if contact.email.trim().is_empty() {
        errors.push("visitor email is required".to_string());
    }
}

impl Engine {
    /// Visitor Capacity Guard. Counts across the whole system; fails closed.
    pub async fn is_visitor_date_available(&self, date: NaiveDate) -> Result<bool, EngineError> {
        let scheduled = self
            .store_call(self.stores.visits.count(&VisitFilter::default().on(date)))
            .await?;
        Ok(scheduled < MAX_VISITS_PER_DAY)
    }

    pub async fn schedule_visit(&self, who: &Identity, request: VisitRequest) -> Result<Visit, EngineError> {
        let mut errors = Vec::new();
        let date = parse_date(&request.date);
        if date.is_none() {
            errors.push("date malformed. must be yyyy-mm-dd".to_string());
        }
        visitor_email_required(&request.visitor, &mut errors);
        let Some(date) = date.filter(|_| errors.is_empty()) else {
            return Err(EngineError::InvalidInput(errors));
        };

        let profile = self.get_user(who).await?;
        let supervisor = Supervisor {
            display_name: format!("{} {}", profile.first_name, profile.last_name),
            first_name: profile.first_name,
            last_name: profile.last_name,
            email: profile.email,
        };

        let guard = self.locks.acquire(vec![AdmissionKey::Visits(date)]).await;
        if !self.is_visitor_date_available(date).await? {
            metrics::counter!(VISITS_REJECTED_TOTAL).increment(1);
            tracing::info!(user = %who.user_id, %date, "visitor limit reached");
            return Err(EngineError::VisitorLimitReached(date));
        }

        let visit = Visit {
            id: Ulid::new(),
            visitor: Visitor::from_contact(request.visitor, &who.user_id),
            date,
            additional_info: request.additional_info,
            needs_parking_space: request.needs_parking_space,
            user: who.user_id.clone(),
            supervisor,
            has_accepted: false,
        };
        let visits = self.stores.visits.clone();
        let row = visit.clone();
        self.store_write(guard, async move { visits.insert(row).await }).await?;
        metrics::counter!(VISITS_SCHEDULED_TOTAL).increment(1);
        tracing::debug!(user = %who.user_id, %date, id = %visit.id, "visit scheduled");
        self.notify.send(Notice::VisitScheduled(visit.clone()));
        Ok(visit)
    }

    pub async fn list_visits(&self, who: &Identity) -> Result<Vec<Visit>, EngineError> {
        let filter = VisitFilter::default().user(who.user_id.as_str());
        Ok(self.store_call(self.stores.visits.find(&filter)).await?)
    }

    /// Full view of one visit, for its host or an admin.
    pub async fn get_visit(&self, who: &Identity, id: Ulid) -> Result<Visit, EngineError> {
        let visit = self.find_visit(id).await?;
        if visit.user != who.user_id && !self.admins.is_admin(&who.email).await {
            return Err(visit_not_found(id));
        }
        Ok(visit)
    }

    /// Every visitor ever invited, one per email address, ordered by email.
    pub async fn list_visitors(&self) -> Result<Vec<Visitor>, EngineError> {
        let visits = self.store_call(self.stores.visits.find(&VisitFilter::default())).await?;
        let mut by_email = BTreeMap::new();
        for visit in visits {
            by_email.entry(visit.visitor.email.clone()).or_insert(visit.visitor);
        }
        Ok(by_email.into_values().collect())
    }

    /// Admins may delete any visit, everybody else only their own.
    pub async fn delete_visit(&self, who: &Identity, id: Ulid) -> Result<u64, EngineError> {
        let mut filter = VisitFilter::default().id(id);
        if !self.admins.is_admin(&who.email).await {
            filter = filter.user(who.user_id.as_str());
        }
        let visits = self.stores.visits.clone();
        let removed = self
            .store_write((), async move { visits.delete(&filter).await })
            .await?;
        tracing::debug!(user = %who.user_id, %id, removed, "visit delete");
        Ok(removed)
    }

    /// What the invited guest may see. Needs no credentials.
    pub async fn get_invitation(&self, id: Ulid) -> Result<Visit, EngineError> {
        Ok(self.find_visit(id).await?.redacted())
    }

    pub async fn accept_invitation(&self, id: Ulid) -> Result<(), EngineError> {
        let visits = self.stores.visits.clone();
        if !self
            .store_write((), async move { visits.mark_accepted(id).await })
            .await?
        {
            return Err(visit_not_found(id));
        }
        tracing::info!(%id, "invitation accepted");
        self.notify.send(Notice::VisitAccepted { id });
        Ok(())
    }

    /// Publish the invitation again so the mailer re-sends it.
    pub async fn resend_invitation(&self, who: &Identity, id: Ulid) -> Result<Visit, EngineError> {
        let visit = self.find_visit(id).await?;
        tracing::debug!(user = %who.user_id, %id, "resending invitation");
        self.notify.send(Notice::InvitationResent(visit.clone()));
        Ok(visit)
    }

    /// Retention: drop every visit dated on or before `cutoff`.
    pub async fn purge_visits_on_or_before(&self, cutoff: NaiveDate) -> Result<u64, EngineError> {
        let filter = VisitFilter::default().on_or_before(cutoff);
        let visits = self.stores.visits.clone();
        Ok(self
            .store_write((), async move { visits.delete(&filter).await })
            .await?)
    }

    /// Record a visitor in the directory without scheduling a visit.
    pub async fn add_visitor(&self, who: &Identity, contact: VisitorContact) -> Result<Visitor, EngineError> {
        let mut errors = Vec::new();
        visitor_email_required(&contact, &mut errors);
        if !errors.is_empty() {
            return Err(EngineError::InvalidInput(errors));
        }
        let visitor = Visitor::from_contact(contact, &who.user_id);
        let visitors = self.stores.visitors.clone();
        let row = visitor.clone();
        self.store_write((), async move { visitors.insert_visitor(row).await })
            .await?;
        tracing::debug!(user = %who.user_id, id = %visitor.id, "visitor added");
        Ok(visitor)
    }

    pub async fn get_visitor(&self, id: Ulid) -> Result<Visitor, EngineError> {
        self.store_call(self.stores.visitors.get_visitor(id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("visitor {id}")))
    }

    async fn find_visit(&self, id: Ulid) -> Result<Visit, EngineError> {
        self.store_call(self.stores.visits.find(&VisitFilter::default().id(id)))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| visit_not_found(id))
    }
}
