//! Newline-delimited JSON front-end.
//!
//! One request per line: `{"op": "...", "token": "...", ...op fields}`.
//! One reply per line: `{"code": 200, "body": ...}` or
//! `{"code": N, "errors": [...]}`. After a `listen` op, notifications for the
//! channel arrive on the same connection as `{"code": 200, "notice": ...}`.

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, Horizon};
use crate::identity::Identity;
use crate::limits::MAX_LINE_LEN;
use crate::model::{BookingRequest, ProfileUpdate, VisitRequest, VisitorContact, parse_date};
use crate::notify::{Notice, Topic};
use crate::observability::{AUTH_FAILURES_TOTAL, REQUEST_DURATION_SECONDS, REQUESTS_TOTAL};
use crate::store::AreaFilter;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Codec(#[from] LinesCodecError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateBookings(BookingRequest),
    ListBookings,
    DeleteBooking { id: Ulid },
    AdminBookings,
    AdminDayOverview { date: String },
    ListAreas {
        #[serde(default)]
        location: Option<String>,
    },
    GetArea { id: String },
    UnavailableDates { area: String },
    IsBookable { area: String, date: String },
    Forecast {
        area: String,
        /// Number or numeric string; absent means 7.
        #[serde(default)]
        days_in_future: Option<Value>,
    },
    ScheduleVisit(VisitRequest),
    ListVisits,
    GetVisit { id: Ulid },
    ListVisitors,
    AddVisitor(VisitorContact),
    GetVisitor { id: Ulid },
    DeleteVisit { id: Ulid },
    VisitorDateAvailable { date: String },
    GetInvitation { id: Ulid },
    AcceptInvitation { id: Ulid },
    ResendInvitation { id: Ulid },
    ContactTrace { email: String },
    GetUser,
    UpdateUser(ProfileUpdate),
    /// 200 for location managers, 403 for everybody else.
    IsAdmin,
    RefreshSettings,
    /// `visits` or `area_{id}`.
    Listen { channel: String },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateBookings(_) => "create_bookings",
            Request::ListBookings => "list_bookings",
            Request::DeleteBooking { .. } => "delete_booking",
            Request::AdminBookings => "admin_bookings",
            Request::AdminDayOverview { .. } => "admin_day_overview",
            Request::ListAreas { .. } => "list_areas",
            Request::GetArea { .. } => "get_area",
            Request::UnavailableDates { .. } => "unavailable_dates",
            Request::IsBookable { .. } => "is_bookable",
            Request::Forecast { .. } => "forecast",
            Request::ScheduleVisit(_) => "schedule_visit",
            Request::ListVisits => "list_visits",
            Request::GetVisit { .. } => "get_visit",
            Request::ListVisitors => "list_visitors",
            Request::AddVisitor(_) => "add_visitor",
            Request::GetVisitor { .. } => "get_visitor",
            Request::DeleteVisit { .. } => "delete_visit",
            Request::VisitorDateAvailable { .. } => "visitor_date_available",
            Request::GetInvitation { .. } => "get_invitation",
            Request::AcceptInvitation { .. } => "accept_invitation",
            Request::ResendInvitation { .. } => "resend_invitation",
            Request::ContactTrace { .. } => "contact_trace",
            Request::GetUser => "get_user",
            Request::UpdateUser(_) => "update_user",
            Request::IsAdmin => "is_admin",
            Request::RefreshSettings => "refresh_settings",
            Request::Listen { .. } => "listen",
        }
    }

    /// Invitation links are opened by guests without an account.
    pub fn is_public(&self) -> bool {
        matches!(self, Request::GetInvitation { .. } | Request::AcceptInvitation { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Bookings a partially failed admission did commit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub committed: Vec<Ulid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<Value>,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self {
            code: 200,
            body: Some(body),
            errors: Vec::new(),
            committed: Vec::new(),
            notice: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: 400,
            body: None,
            errors: vec![message.into()],
            committed: Vec::new(),
            notice: None,
        }
    }

    pub fn from_error(err: &EngineError) -> Self {
        Self {
            code: err.status_code(),
            body: None,
            errors: err.messages(),
            committed: err.committed().to_vec(),
            notice: None,
        }
    }

    pub fn notice(notice: &Notice) -> Self {
        Self {
            code: 200,
            body: None,
            errors: Vec::new(),
            committed: Vec::new(),
            notice: Some(to_body(notice)),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to encode response");
            r#"{"code":500,"errors":["internal server error"]}"#.to_string()
        })
    }
}

fn to_body<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Split a request line into its bearer token and operation.
pub fn parse_line(line: &str) -> Result<(Option<String>, Request), Response> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| Response::bad_request(format!("body malformed: {e}")))?;
    let token = value
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .filter(|t| !t.is_empty());
    let request: Request =
        serde_json::from_value(value).map_err(|e| Response::bad_request(format!("body malformed: {e}")))?;
    Ok((token, request))
}

fn date_arg(raw: &str) -> Result<chrono::NaiveDate, EngineError> {
    parse_date(raw).ok_or_else(|| EngineError::invalid("could not parse date"))
}

fn horizon_arg(raw: Option<&Value>) -> Result<Horizon, EngineError> {
    match raw {
        None | Some(Value::Null) => Ok(Horizon::default()),
        Some(Value::String(s)) => Horizon::parse(Some(s.as_str())),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(days) => Horizon::new(days),
            None => Err(EngineError::invalid("cannot parse days-in-future query parameter")),
        },
        Some(_) => Err(EngineError::invalid("cannot parse days-in-future query parameter")),
    }
}

async fn authenticate(engine: &Engine, token: Option<&str>) -> Result<Identity, EngineError> {
    let Some(token) = token else {
        metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
        return Err(EngineError::Unauthorized);
    };
    engine.identity_provider().resolve(token).await.map_err(|e| {
        metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
        EngineError::from(e)
    })
}

/// Run one operation against the engine.
pub async fn dispatch(engine: &Engine, token: Option<&str>, request: Request) -> Result<Value, EngineError> {
    if let Request::GetInvitation { id } = request {
        return Ok(to_body(engine.get_invitation(id).await?));
    }
    if let Request::AcceptInvitation { id } = request {
        engine.accept_invitation(id).await?;
        return Ok(Value::Null);
    }

    let who = authenticate(engine, token).await?;
    let body = match request {
        Request::CreateBookings(req) => to_body(engine.create_bookings(&who, &req).await?),
        Request::ListBookings => to_body(engine.list_bookings(&who).await?),
        Request::DeleteBooking { id } => {
            let deleted = engine.delete_booking(&who, id).await?;
            json!({ "deleted": deleted })
        }
        Request::AdminBookings => to_body(engine.admin_list_bookings(&who).await?),
        Request::AdminDayOverview { date } => to_body(engine.admin_day_overview(&who, date_arg(&date)?).await?),
        Request::ListAreas { location } => to_body(engine.list_areas(&AreaFilter { location }).await?),
        Request::GetArea { id } => to_body(engine.get_area(&id).await?),
        Request::UnavailableDates { area } => to_body(engine.unavailable_dates(&area).await?),
        Request::IsBookable { area, date } => {
            json!({ "bookable": engine.is_bookable(&area, date_arg(&date)?).await? })
        }
        Request::Forecast { area, days_in_future } => {
            let horizon = horizon_arg(days_in_future.as_ref())?;
            to_body(engine.forecast(&who, &area, horizon).await?)
        }
        Request::ScheduleVisit(req) => to_body(engine.schedule_visit(&who, req).await?),
        Request::ListVisits => to_body(engine.list_visits(&who).await?),
        Request::GetVisit { id } => to_body(engine.get_visit(&who, id).await?),
        Request::ListVisitors => to_body(engine.list_visitors().await?),
        Request::AddVisitor(contact) => to_body(engine.add_visitor(&who, contact).await?),
        Request::GetVisitor { id } => to_body(engine.get_visitor(id).await?),
        Request::DeleteVisit { id } => {
            json!({ "deleted_items": engine.delete_visit(&who, id).await? })
        }
        Request::VisitorDateAvailable { date } => {
            json!({ "available": engine.is_visitor_date_available(date_arg(&date)?).await? })
        }
        Request::ResendInvitation { id } => to_body(engine.resend_invitation(&who, id).await?),
        Request::ContactTrace { email } => to_body(engine.contact_trace(&who, &email).await?),
        Request::GetUser => to_body(engine.get_user(&who).await?),
        Request::UpdateUser(update) => to_body(engine.update_user(&who, update).await?),
        Request::IsAdmin => {
            if !engine.is_admin(&who).await {
                return Err(EngineError::NotAdmin);
            }
            json!({ "admin": true })
        }
        Request::RefreshSettings => json!({ "location_managers": engine.refresh_settings().await? }),
        Request::Listen { channel } => json!({ "listening": channel }),
        Request::GetInvitation { .. } | Request::AcceptInvitation { .. } => Value::Null,
    };
    Ok(body)
}

/// Resolve a `listen` channel name to a topic the caller may follow.
async fn listen_topic(engine: &Engine, token: Option<&str>, channel: &str) -> Result<Topic, EngineError> {
    authenticate(engine, token).await?;
    if channel == "visits" {
        return Ok(Topic::Visits);
    }
    let Some(area) = channel.strip_prefix("area_") else {
        return Err(EngineError::invalid(format!(
            "invalid channel: {channel} (expected visits or area_{{id}})"
        )));
    };
    engine.get_area(area).await?;
    Ok(Topic::Area(area.to_string()))
}

fn forward_notices(mut rx: broadcast::Receiver<Notice>, tx: mpsc::Sender<Notice>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notice) => {
                    if tx.send(notice).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "listener lagged, notices dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Handle one parsed request, recording metrics.
pub async fn handle(engine: &Engine, token: Option<&str>, request: Request) -> Response {
    let op = request.name();
    let started = Instant::now();
    let response = match dispatch(engine, token, request).await {
        Ok(body) => Response::ok(body),
        Err(e) => {
            if e.status_code() >= 500 {
                tracing::error!(op, error = %e, "request failed");
            } else {
                tracing::debug!(op, error = %e, "request rejected");
            }
            Response::from_error(&e)
        }
    };
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "code" => response.code.to_string()).increment(1);
    response
}

pub async fn process_connection<S>(socket: S, engine: Arc<Engine>) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (notice_tx, mut notice_rx) = mpsc::channel::<Notice>(64);
    let mut listeners: Vec<JoinHandle<()>> = Vec::new();

    let result = loop {
        tokio::select! {
            line = framed.next() => {
                let line = match line {
                    None => break Ok(()),
                    Some(Err(e)) => break Err(e.into()),
                    Some(Ok(line)) => line,
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = match parse_line(&line) {
                    Err(reply) => reply,
                    Ok((token, Request::Listen { channel })) => {
                        match listen_topic(&engine, token.as_deref(), &channel).await {
                            Ok(topic) => {
                                let rx = engine.notify.subscribe(topic);
                                listeners.push(forward_notices(rx, notice_tx.clone()));
                                Response::ok(json!({ "listening": channel }))
                            }
                            Err(e) => Response::from_error(&e),
                        }
                    }
                    Ok((token, request)) => handle(&engine, token.as_deref(), request).await,
                };
                if let Err(e) = framed.send(reply.to_line()).await {
                    break Err(e.into());
                }
            }
            Some(notice) = notice_rx.recv() => {
                if let Err(e) = framed.send(Response::notice(&notice).to_line()).await {
                    break Err(e.into());
                }
            }
        }
    };

    for listener in listeners {
        listener.abort();
    }
    result
}
