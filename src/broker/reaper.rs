//! Heartbeat reaper: sweeps the registry on a fixed tick and force-disconnects
//! agents that have gone silent. Holds only a weak reference so it dies with
//! the broker.

use super::Shared;
use std::sync::Weak;

pub(crate) async fn run_reaper(shared: Weak<Shared>) {
    let (interval, timeout) = {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        (shared.config.reaper_interval, shared.config.heartbeat_timeout)
    };

    let mut ticker = tokio::time::interval(interval);
    // The immediate first tick is harmless: nothing can be expired yet.
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let Ok(mut state) = shared.state.lock() else {
            tracing::warn!("reaper skipping sweep: state lock poisoned");
            continue;
        };
        for id in state.expired_ids(timeout) {
            let name = state.name_of(&id).unwrap_or("?").to_string();
            tracing::warn!("reaping agent {name} ({id}): heartbeat timed out");
            state.disconnect(&id);
        }
    }
}
