//! Background reconnection with exponential backoff

use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ConnectionManager;
use crate::types::{ConnectionState, TimeSyncInfo};

/// Outcome of a single reconnection attempt.
enum Attempt {
    Connected,
    Failed,
    Abandoned,
}

/// Spawn the reconnect loop for a lost link.
///
/// The loop ends when a link is re-established, the retry budget is
/// exhausted, the manager is dropped or `cancel` fires.
pub(super) fn spawn(manager: Weak<ConnectionManager>, cancel: CancellationToken) {
    tokio::spawn(async move { run(manager, cancel).await });
}

async fn run(manager: Weak<ConnectionManager>, cancel: CancellationToken) {
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let delay = {
            let Some(manager) = manager.upgrade() else { return };
            let policy = &manager.config.reconnect;
            if !policy.allows_attempt(attempt) {
                warn!(attempts = attempt - 1, "Reconnection budget exhausted, giving up");
                return;
            }
            policy.delay_for_attempt(attempt)
        };

        debug!(attempt, ?delay, "Waiting before reconnection attempt");
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(attempt, "Reconnection cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(manager) = manager.upgrade() else { return };
        match manager.reconnect_once(attempt, &cancel).await {
            Attempt::Connected | Attempt::Abandoned => return,
            Attempt::Failed => continue,
        }
    }
}

impl ConnectionManager {
    async fn reconnect_once(self: &Arc<Self>, attempt: u32, cancel: &CancellationToken) -> Attempt {
        let _guard = self.transition.lock().await;
        if cancel.is_cancelled() {
            return Attempt::Abandoned;
        }

        let (server, identity) = {
            let status = self.status.borrow();
            match &status.target {
                Some(target) => (target.clone(), status.identity.clone()),
                None => return Attempt::Abandoned,
            }
        };

        info!(%server, attempt, "Reconnecting to NetworkTables");
        self.set_state(ConnectionState::Connecting, |status| status.reconnect_attempts = attempt);

        let timeout = self.config.connect_timeout;
        let opened = tokio::select! {
            _ = cancel.cancelled() => {
                self.client.close().await;
                return Attempt::Abandoned;
            }
            opened = tokio::time::timeout(timeout, self.client.open(&server, &identity)) => opened,
        };

        match opened {
            Ok(Ok(link)) => {
                let generation = self.establish(link, cancel.clone());
                info!(%server, attempt, generation, "Reconnected to NetworkTables");
                Attempt::Connected
            }
            Ok(Err(e)) => {
                warn!(%server, attempt, error = %e, "Reconnection attempt failed");
                self.client.close().await;
                self.set_state(ConnectionState::Disconnected, |status| {
                    status.time_sync = TimeSyncInfo::default();
                });
                Attempt::Failed
            }
            Err(_) => {
                warn!(%server, attempt, ?timeout, "Reconnection attempt timed out");
                self.client.close().await;
                self.set_state(ConnectionState::Disconnected, |_| {});
                Attempt::Failed
            }
        }
    }
}
