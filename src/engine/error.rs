use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::identity::IdentityError;
use crate::store::StoreError;

/// Outcome classes every adaptation layer must keep distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Input,
    CapacityConflict,
    DuplicateConflict,
    NotFound,
    Unauthorized,
    Forbidden,
    Internal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Every violated constraint, not just the first.
    #[error("invalid input: {}", .0.join("; "))]
    InvalidInput(Vec<String>),

    /// `committed` lists bookings from the same request admitted before the conflict.
    #[error("no capacity for booking on {date}")]
    NoCapacity {
        area: String,
        date: NaiveDate,
        committed: Vec<Ulid>,
    },

    #[error("you already checked in for {}", join_dates(.dates))]
    AlreadyCheckedIn {
        dates: Vec<NaiveDate>,
        committed: Vec<Ulid>,
    },

    #[error("the visitor limit for {0} is reached. you have to select another date")]
    VisitorLimitReached(NaiveDate),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("the token is invalid or not found in your request")]
    Unauthorized,

    #[error("you are not permitted to perform this request")]
    Forbidden,

    #[error("you are not an admin")]
    NotAdmin,

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("identity provider failure: {0}")]
    Identity(String),

    /// A multi-date admission failed after some dates were already written.
    /// Classified like `source`; `committed` lists what stays written.
    #[error("{source}")]
    Interrupted {
        source: Box<EngineError>,
        committed: Vec<Ulid>,
    },
}

fn join_dates(dates: &[NaiveDate]) -> String {
    dates
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidInput(vec![msg.into()])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_) => ErrorKind::Input,
            EngineError::NoCapacity { .. } | EngineError::VisitorLimitReached(_) => {
                ErrorKind::CapacityConflict
            }
            EngineError::AlreadyCheckedIn { .. } => ErrorKind::DuplicateConflict,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Unauthorized => ErrorKind::Unauthorized,
            EngineError::Forbidden | EngineError::NotAdmin => ErrorKind::Forbidden,
            EngineError::Store(_) | EngineError::Identity(_) => ErrorKind::Internal,
            EngineError::Interrupted { source, .. } => source.kind(),
        }
    }

    /// HTTP-class status for adaptation layers. Booking capacity maps to
    /// 423 (locked); the visitor ceiling asks for another date with 409.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::NoCapacity { .. } => 423,
            EngineError::VisitorLimitReached(_) => 409,
            EngineError::Interrupted { source, .. } => source.status_code(),
            _ => match self.kind() {
                ErrorKind::Input => 400,
                ErrorKind::CapacityConflict | ErrorKind::DuplicateConflict => 409,
                ErrorKind::NotFound => 404,
                ErrorKind::Unauthorized => 401,
                ErrorKind::Forbidden => 403,
                ErrorKind::Internal => 500,
            },
        }
    }

    /// Client-facing messages. Internal failures are not leaked.
    pub fn messages(&self) -> Vec<String> {
        match self {
            EngineError::InvalidInput(errs) => errs.clone(),
            EngineError::Interrupted { source, .. } => source.messages(),
            EngineError::Store(_) | EngineError::Identity(_) => vec![
                "internal server error. please contact your administrator for further assistance"
                    .to_string(),
            ],
            other => vec![other.to_string()],
        }
    }

    /// Bookings already committed by a partially failed admission.
    pub fn committed(&self) -> &[Ulid] {
        match self {
            EngineError::NoCapacity { committed, .. }
            | EngineError::AlreadyCheckedIn { committed, .. }
            | EngineError::Interrupted { committed, .. } => committed,
            _ => &[],
        }
    }
}

impl From<IdentityError> for EngineError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidToken => EngineError::Unauthorized,
            IdentityError::UnknownUser(u) => EngineError::NotFound(format!("user {u}")),
            IdentityError::Unavailable(msg) => EngineError::Identity(msg),
        }
    }
}
