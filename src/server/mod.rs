//! HTTP surface: shared state, handlers and the route table.

pub mod handler;
pub mod router;
pub mod state;

pub use handler::CallerIdentity;
pub use router::create_router;
pub use state::{ServerState, ServerStateBuilder};
