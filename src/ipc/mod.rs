//! JSON-lines IPC surface: request/response envelope types, the
//! method router, and the per-area handler modules.

mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};
