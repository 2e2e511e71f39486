//! Admin-issued commands: timer control, active content and per-display commands
//!
//! The protocol has no roles; any connection may send these.

use crate::protocol::{ClientCommand, Envelope, ServerMessage, SetResult, TimerAction, TimerControl};
use crate::state::hub::Hub;
use crate::state::AppState;
use crate::types::ConnId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// `client_command` that renames a display instead of switching its mode
pub const RENAME_COMMAND: &str = "rename";
/// `update_config` key carrying a new display name
pub const CLIENT_NAME_KEY: &str = "ClientName";

/// Total `display_mode` sends per mode switch; unacknowledged, so a display may
/// see the same mode more than once
pub const DISPLAY_MODE_ATTEMPTS: usize = 3;
pub const DISPLAY_MODE_RETRY_DELAY: Duration = Duration::from_millis(250);

pub fn handle_timer_control(state: &Arc<AppState>, control: TimerControl) {
    match control.action {
        TimerAction::Start => state.timer.start(),
        TimerAction::Pause => state.timer.pause(),
        TimerAction::Reset => state.timer.reset(control.seconds),
        TimerAction::Unknown => tracing::warn!("Ignoring unknown timer action"),
    }
}

/// Point every display at `result.file` and relay the incoming envelope to all of them
pub fn handle_set_result(state: &Arc<AppState>, result: SetResult, envelope: &Envelope) {
    tracing::info!("Active content set to {}", result.file);
    let delivered = state.hub.publish_active_content(result.file, envelope);
    tracing::debug!("set_result relayed to {} clients", delivered);
}

pub fn handle_client_command(state: &Arc<AppState>, command: ClientCommand) {
    let Some(conn_id) = state.hub.resolve_target(&command.target) else {
        tracing::debug!(
            "Dropping {} command for unknown target {}",
            command.command,
            command.target
        );
        return;
    };

    if command.command == RENAME_COMMAND {
        tracing::info!("Renaming {} to {}", conn_id, command.value);
        state.hub.send_to(
            &conn_id,
            &ServerMessage::UpdateConfig {
                key: CLIENT_NAME_KEY.to_string(),
                value: command.value,
            },
        );
        return;
    }

    tracing::info!("Switching {} to display mode {}", conn_id, command.command);
    if state.hub.switch_display_mode(&conn_id, &command.command) {
        let msg = ServerMessage::DisplayMode(command.command);
        spawn_display_mode_retries(state.hub.clone(), conn_id, msg);
    }
}

/// Repeat a `display_mode` send after the first one, stopping early if the
/// target goes away
fn spawn_display_mode_retries(hub: Arc<Hub>, conn_id: ConnId, msg: ServerMessage) -> JoinHandle<()> {
    tokio::spawn(async move {
        for _ in 1..DISPLAY_MODE_ATTEMPTS {
            tokio::time::sleep(DISPLAY_MODE_RETRY_DELAY).await;
            if !hub.send_to(&conn_id, &msg) {
                tracing::debug!("Stopping display_mode retries for {}", conn_id);
                return;
            }
        }
    })
}
