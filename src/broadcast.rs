use crate::protocol::ServerMessage;
use crate::state::hub::Hub;
use crate::types::TimerState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Spawn a background task that fans every timer publication out to all displays.
///
/// Publications arrive in the order the timer produced them, so displays never
/// see a stale tick after a pause or reset. The hub keeps the last one for
/// displays that connect later.
pub fn spawn_timer_publisher(
    hub: Arc<Hub>,
    mut updates: mpsc::UnboundedReceiver<TimerState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(state) = updates.recv().await {
            let delivered = hub.publish_timer(state);
            tracing::debug!("Timer update delivered to {} clients", delivered);
        }
        tracing::debug!("Timer publisher stopped");
    })
}
