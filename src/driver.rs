//! Driver pumps client events into the connection manager

use std::sync::Weak;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::client::ClientEvent;
use crate::connection::ConnectionManager;

/// Driver spawns the event pump for one established link
///
/// The pump owns the link's event receiver and republishes every event
/// through the manager until the link ends or the connection lifetime is
/// cancelled. It only holds a weak reference, so dropping the bridge stops it.
pub struct Driver;

impl Driver {
    /// Spawn the pump for the link of `generation`
    ///
    /// `pending_loss` carries a disconnect already observed while the
    /// handshake events were being applied.
    pub fn spawn(
        manager: Weak<ConnectionManager>,
        events: mpsc::UnboundedReceiver<ClientEvent>,
        cancel: CancellationToken,
        generation: u64,
        pending_loss: Option<String>,
    ) {
        tokio::spawn(async move {
            Self::event_pump_task(manager, events, cancel, generation, pending_loss).await;
        });
    }

    async fn event_pump_task(
        manager: Weak<ConnectionManager>,
        mut events: mpsc::UnboundedReceiver<ClientEvent>,
        cancel: CancellationToken,
        generation: u64,
        pending_loss: Option<String>,
    ) {
        info!(generation, "Event pump started");
        let mut event_count = 0u64;

        let loss = match pending_loss {
            Some(reason) => Some(reason),
            None => loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(generation, "Event pump cancelled");
                        break None;
                    }
                    event = events.recv() => event,
                };

                let Some(manager) = manager.upgrade() else {
                    debug!(generation, "Connection manager dropped, stopping pump");
                    break None;
                };

                match event {
                    Some(event) => {
                        event_count += 1;
                        trace!(generation, event_count, "Client event");
                        if let Some(reason) = manager.apply_client_event(event, generation) {
                            break Some(reason);
                        }
                    }
                    None => break Some("client event stream closed".to_string()),
                }
            },
        };

        if let Some(reason) = loss {
            if let Some(manager) = manager.upgrade() {
                manager.handle_link_lost(generation, reason, cancel).await;
            }
        }

        info!(generation, event_count, "Event pump ended");
    }
}
