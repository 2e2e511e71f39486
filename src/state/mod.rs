pub mod hub;
pub mod timer;

use crate::broadcast;
use crate::config::ServerConfig;
use hub::Hub;
use std::sync::Arc;
use timer::TimerEngine;
use tokio_util::task::TaskTracker;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    /// Live display connections and the active content pointer
    pub hub: Arc<Hub>,
    pub timer: TimerEngine,
    /// Connection workers, awaited on shutdown
    pub workers: TaskTracker,
}

impl AppState {
    /// Build the hub and timer and start the timer publisher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let hub = Arc::new(Hub::new(config.max_clients));
        let (timer, updates) = TimerEngine::new();
        broadcast::spawn_timer_publisher(hub.clone(), updates);

        Self {
            config,
            hub,
            timer,
            workers: TaskTracker::new(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}
