//! Background worker wiring: the outbox dispatcher, the retention purger,
//! and the order sweepers (expiry + auto-complete).

use crate::handlers;
use crate::ServiceState;
use chrono::Duration as ChronoDuration;
use coziyoo_core::{orders, outbox, retention};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const OUTBOX_POLL: Duration = Duration::from_secs(2);
const SWEEP_POLL: Duration = Duration::from_secs(60);
const RETENTION_POLL: Duration = Duration::from_secs(6 * 3600);

pub fn spawn_all(state: &ServiceState) {
    let registry = Arc::new(handlers::build_registry(state.store.clone()));

    tokio::spawn(outbox::run_worker(
        state.store.clone(),
        registry,
        OUTBOX_POLL,
    ));

    tokio::spawn(retention::run_worker(
        state.store.clone(),
        state.config.retention_days,
        RETENTION_POLL,
    ));

    let store = state.store.clone();
    let approval_ttl = ChronoDuration::hours(state.config.approval_expiry_hours);
    let payment_ttl = ChronoDuration::hours(state.config.payment_expiry_hours);
    let complete_grace = ChronoDuration::hours(state.config.auto_complete_hours);
    tokio::spawn(async move {
        info!("order sweeper started");
        let mut ticker = tokio::time::interval(SWEEP_POLL);
        loop {
            ticker.tick().await;
            match orders::expire_sweep(&store, approval_ttl, payment_ttl).await {
                Ok(0) => {}
                Ok(count) => info!(count, "orders expired"),
                Err(err) => error!(error = %err, "expiry sweep failed"),
            }
            match orders::auto_complete_sweep(&store, complete_grace).await {
                Ok(0) => {}
                Ok(count) => info!(count, "orders auto-completed"),
                Err(err) => error!(error = %err, "auto-complete sweep failed"),
            }
        }
    });
}
