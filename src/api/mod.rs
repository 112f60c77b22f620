mod handlers;
pub mod response;
mod routes;

pub use handlers::{CommandRequest, CommandResponse, HealthResponse};
pub use routes::create_router;
