//! HTTP surface: routing, handlers, shared state, and errors.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
