//! Display-issued messages

use crate::protocol::Handshake;
use crate::state::AppState;
use std::sync::Arc;

/// Record the name and identity a display announces; the roster is republished
pub fn handle_handshake(state: &Arc<AppState>, conn_id: &str, handshake: Handshake) {
    if !state.hub.handshake(conn_id, handshake.id, handshake.name) {
        tracing::debug!("Handshake from {} after it left the hub", conn_id);
    }
}
