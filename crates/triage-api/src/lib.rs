//! Triage API crate - axum HTTP surface over the classification service.
//!
//! Exposes classify, categories, stats, and health endpoints. Handlers only
//! validate input and delegate; all classification logic lives in
//! `triage-vector`.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
