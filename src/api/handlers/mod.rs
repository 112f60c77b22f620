mod admin;
mod commands;
mod events;

pub use admin::{health, HealthResponse};
pub use commands::{submit_command, CommandRequest, CommandResponse};
pub use events::stream_events;
