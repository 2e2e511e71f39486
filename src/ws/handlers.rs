//! WebSocket message dispatch
//!
//! Every inbound text frame is decoded into an `Envelope`, validated against the
//! payload shape for its `type`, and routed to the admin or display handlers.
//! Decoding failures are returned to the reader, which logs and drops them.

use crate::protocol::{ClientMessage, Envelope, ProtocolError};
use crate::state::AppState;
use std::sync::Arc;

use super::{admin, display};

/// Decode and dispatch one text frame
pub fn handle_text(text: &str, conn_id: &str, state: &Arc<AppState>) -> Result<(), ProtocolError> {
    let envelope = Envelope::parse(text)?;
    handle_message(&envelope, conn_id, state)
}

/// Route a decoded envelope sent by connection `conn_id`
pub fn handle_message(
    envelope: &Envelope,
    conn_id: &str,
    state: &Arc<AppState>,
) -> Result<(), ProtocolError> {
    match ClientMessage::try_from(envelope)? {
        ClientMessage::TimerControl(control) => admin::handle_timer_control(state, control),

        ClientMessage::Handshake(handshake) => {
            display::handle_handshake(state, conn_id, handshake)
        }

        // relayed verbatim, so the raw envelope goes along
        ClientMessage::SetResult(result) => admin::handle_set_result(state, result, envelope),

        ClientMessage::ClientCommand(command) => admin::handle_client_command(state, command),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerMessage;
    use crate::state::hub::{Connection, Outbound};
    use crate::types::TimerPhase;
    use tokio::sync::mpsc;

    fn connect(state: &Arc<AppState>, addr: &str) -> (String, mpsc::Receiver<Outbound>) {
        let (conn, mut rx) = Connection::open(addr, 64);
        let id = state.hub.register(conn).unwrap();
        while rx.try_recv().is_ok() {}
        (id, rx)
    }

    #[tokio::test]
    async fn test_malformed_frames_are_rejected_without_side_effects() {
        let state = Arc::new(AppState::default());
        let (id, mut rx) = connect(&state, "10.0.0.1:1000");

        assert!(matches!(
            handle_text("{", &id, &state),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            handle_text(r#"{"type":"set_result","payload":{}}"#, &id, &state),
            Err(ProtocolError::MalformedPayload { .. })
        ));
        assert!(matches!(
            handle_text(r#"{"type":"launch","payload":{}}"#, &id, &state),
            Err(ProtocolError::UnknownType(_))
        ));

        assert!(state.hub.active_content().is_empty());
        assert!(state.hub.contains(&id));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_timer_action_is_ignored() {
        let state = Arc::new(AppState::default());
        let (id, _rx) = connect(&state, "10.0.0.1:1000");

        handle_text(
            r#"{"type":"timer_control","payload":{"action":"reset","seconds":30}}"#,
            &id,
            &state,
        )
        .unwrap();
        handle_text(
            r#"{"type":"timer_control","payload":{"action":"explode"}}"#,
            &id,
            &state,
        )
        .unwrap();

        assert_eq!(state.timer.phase(), TimerPhase::Paused);
        assert_eq!(state.timer.snapshot().time_left, 30);
    }

    #[tokio::test]
    async fn test_set_result_is_relayed_verbatim() {
        let state = Arc::new(AppState::default());
        let (id, mut rx) = connect(&state, "10.0.0.1:1000");

        handle_text(
            r#"{"type":"set_result","payload":{"file":"heat2.html","round":2}}"#,
            &id,
            &state,
        )
        .unwrap();

        assert_eq!(state.hub.active_content(), "heat2.html");
        let relayed: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(
            relayed,
            serde_json::json!({"type": "set_result", "payload": {"file": "heat2.html", "round": 2}})
        );
    }

    #[tokio::test]
    async fn test_handshake_names_the_sender() {
        let state = Arc::new(AppState::default());
        let (id, mut rx) = connect(&state, "10.0.0.1:1000");

        handle_text(
            r#"{"type":"handshake","payload":{"name":"Lobby","id":"disp-1"}}"#,
            &id,
            &state,
        )
        .unwrap();

        let msg: ServerMessage = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        match msg {
            ServerMessage::ClientList(roster) => {
                assert_eq!(roster[0].name, "Lobby");
                assert_eq!(roster[0].id, "disp-1");
                assert_eq!(roster[0].conn_id, id);
            }
            other => panic!("expected client_list, got {:?}", other),
        }
    }
}
