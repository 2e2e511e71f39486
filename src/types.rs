use serde::{Deserialize, Serialize};

/// Server-generated connection identity (ULID), stable for the lifetime of one socket
pub type ConnId = String;

/// Display mode showing the countdown overlay
pub const SHOW_TIMER: &str = "show_timer";
/// Display mode showing the active content (the default)
pub const SHOW_RESULT: &str = "show_result";

/// Name shown for a connection that has not completed its handshake
pub const UNKNOWN_NAME: &str = "Unknown";

/// Countdown state as published to every display in `timer_update`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub running: bool,
    pub time_left: u32,
    pub total_time: u32,
}

impl TimerState {
    pub fn phase(&self) -> TimerPhase {
        if self.running {
            TimerPhase::Running
        } else if self.time_left == 0 {
            TimerPhase::Idle
        } else {
            TimerPhase::Paused
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
}

/// One connected display as shown in the admin view.
///
/// Derived from the registry on every publish and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Identity supplied by the client at handshake (may be empty or duplicated)
    pub id: String,
    /// Server-assigned routing key for `client_command`
    pub conn_id: ConnId,
    pub name: String,
    pub addr: String,
    pub display_mode: String,
    pub connected_at: String,
}

impl RosterEntry {
    /// Roster order: case-insensitive name, then address
    pub fn sort(entries: &mut [RosterEntry]) {
        entries.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.addr.cmp(&b.addr))
        });
    }
}
