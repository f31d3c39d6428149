//! Postroom API - HTTP surface for queue administration, provider
//! webhooks, event listings and webhook traces.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
