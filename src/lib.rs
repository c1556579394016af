// Public API for integration tests and potential library usage

pub mod api;
pub mod config;
pub mod hub;
pub mod protocol;
pub mod server;
pub mod state;
pub mod types;
pub mod ws;
