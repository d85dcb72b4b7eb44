use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use checkin::clock::SystemClock;
use checkin::config::Config;
use checkin::engine::Engine;
use checkin::identity::StaticIdentityProvider;
use checkin::notify::NotifyHub;
use checkin::observability;
use checkin::reaper::{self, SweepSettings};
use checkin::store::{Stores, WalStore};
use checkin::wire;

/// How often the compactor checks the WAL append counter.
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.service.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    observability::init(cfg.service.metrics_port)?;

    std::fs::create_dir_all(&cfg.store.data_dir)?;
    let store = Arc::new(WalStore::open(&cfg.store.wal_path())?);

    for area in &cfg.areas {
        store.upsert_area(area.clone()).await?;
    }
    if !cfg.settings.location_managers.is_empty() {
        for mail in &cfg.settings.location_managers {
            info!(user_mail = %mail, "adding location manager");
        }
        store.replace_settings(cfg.settings.location_managers.clone()).await?;
    }

    let engine = Arc::new(Engine::new(
        Stores::shared(store.clone()),
        Arc::new(StaticIdentityProvider::new(cfg.identity.users.clone())),
        Arc::new(NotifyHub::new()),
        Arc::new(SystemClock),
        cfg.engine_options(),
    ));
    engine.refresh_settings().await?;

    let sweep = SweepSettings {
        interval: cfg.service.task_interval(),
        bookings: cfg.bookings.clone(),
        visitors: cfg.visitors.clone(),
    };
    tokio::spawn(reaper::run_reaper(engine.clone(), sweep));
    tokio::spawn(reaper::run_compactor(
        store.clone(),
        cfg.store.compact_threshold,
        COMPACT_CHECK_INTERVAL,
    ));

    let max_connections = cfg.service.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = cfg.service.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("checkin listening on {addr}");
    info!("  environment: {}", cfg.service.environment);
    info!("  data_dir: {}", cfg.store.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  areas: {}", store.state().area_count());

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                tracing::debug!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = wire::process_connection(socket, engine).await {
                        tracing::warn!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("checkin stopped");
    Ok(())
}
