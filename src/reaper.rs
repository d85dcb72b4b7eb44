use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::RetentionConfig;
use crate::engine::Engine;
use crate::observability::SWEEP_DELETED_TOTAL;
use crate::store::WalStore;

/// What the retention sweep removes, and how often it runs.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub interval: Duration,
    pub bookings: RetentionConfig,
    pub visitors: RetentionConfig,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub bookings: u64,
    pub visits: u64,
}

/// Background task deleting expired bookings and visits.
/// Runs once right away, then on every tick.
pub async fn run_reaper(engine: Arc<Engine>, settings: SweepSettings) {
    let mut interval = tokio::time::interval(settings.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        sweep_once(&engine, &settings).await;
    }
}

/// One retention pass. Failures are logged; the next tick tries again.
pub async fn sweep_once(engine: &Engine, settings: &SweepSettings) -> SweepReport {
    let today = engine.today();
    let mut report = SweepReport::default();

    if settings.bookings.auto_delete {
        let cutoff = settings.bookings.cutoff(today);
        info!(before_date = %cutoff, "executing delete old bookings task");
        match engine.purge_bookings_on_or_before(cutoff).await {
            Ok(n) => {
                report.bookings = n;
                metrics::counter!(SWEEP_DELETED_TOTAL, "kind" => "bookings").increment(n);
                info!(deleted_items = n, "executed delete old bookings task");
            }
            Err(e) => tracing::error!(error = %e, "delete old bookings task failed"),
        }
    }

    if settings.visitors.auto_delete {
        let cutoff = settings.visitors.cutoff(today);
        info!(before_date = %cutoff, "executing delete old visits task");
        match engine.purge_visits_on_or_before(cutoff).await {
            Ok(n) => {
                report.visits = n;
                metrics::counter!(SWEEP_DELETED_TOTAL, "kind" => "visits").increment(n);
                info!(deleted_items = n, "executed delete old visits task");
            }
            Err(e) => tracing::error!(error = %e, "delete old visits task failed"),
        }
    }

    report
}

/// Background task compacting the WAL once `threshold` appends piled up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!(appends, "compacted WAL");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "WAL compaction failed");
            false
        }
    }
}
