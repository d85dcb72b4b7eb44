mod admission;
mod availability;
mod error;
pub mod expand;
mod forecast;
mod locks;
mod queries;
mod users;
mod visits;

pub use availability::{admits, full_dates};
pub use error::{EngineError, ErrorKind};
pub use forecast::Horizon;
pub use locks::{AdmissionKey, LockTable};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use crate::clock::Clock;
use crate::identity::IdentityProvider;
use crate::limits::DEFAULT_STORE_TIMEOUT;
use crate::notify::NotifyHub;
use crate::settings::AdminRoster;
use crate::store::{StoreError, Stores};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound for every single store round-trip.
    pub store_timeout: Duration,
    /// Contact tracing only accepts emails ending with this suffix.
    pub contact_trace_domain: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            store_timeout: DEFAULT_STORE_TIMEOUT,
            contact_trace_domain: None,
        }
    }
}

/// The booking and visitor admission core.
///
/// Holds no domain state of its own: capacities, bookings and visits are
/// re-read from the store collaborators on every call. The only in-process
/// state is the admin roster and the admission lock table.
pub struct Engine {
    pub(super) stores: Stores,
    pub(super) identity: Arc<dyn IdentityProvider>,
    pub admins: AdminRoster,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) options: EngineOptions,
    pub(super) locks: LockTable,
}

impl Engine {
    pub fn new(
        stores: Stores,
        identity: Arc<dyn IdentityProvider>,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> Self {
        Self {
            stores,
            identity,
            admins: AdminRoster::new(),
            notify,
            clock,
            options,
            locks: LockTable::new(),
        }
    }

    pub fn identity_provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Run one store call under the configured timeout.
    pub(super) async fn store_call<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let limit = self.options.store_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(limit)),
        }
    }

    /// Run one store mutation under the configured timeout.
    ///
    /// The write runs on its own task and is never cancelled: a timeout only
    /// stops the caller from waiting. `hold` (usually the admission guard) is
    /// released when the write finishes, so the next contender sees its result.
    pub(super) async fn store_write<T, F, G>(&self, hold: G, write: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
        G: Send + 'static,
    {
        let limit = self.options.store_timeout;
        let task = tokio::spawn(async move {
            let result = write.await;
            drop(hold);
            result
        });
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StoreError::Unavailable(format!("store write aborted: {e}"))),
            Err(_) => {
                metrics::counter!(crate::observability::STORE_WRITES_DETACHED).increment(1);
                tracing::warn!(?limit, "store write outlived its timeout, left running");
                Err(StoreError::Timeout(limit))
            }
        }
    }
}
