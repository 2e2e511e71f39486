// Public API for integration tests and the binary

pub mod api;
pub mod config;
pub mod discovery;
pub mod origin;
pub mod protocol;
pub mod server;
pub mod state;
pub mod types;
pub mod ws;

// Timer publisher task
pub mod broadcast;
