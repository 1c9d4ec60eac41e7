//! Triage core crate - configuration, error taxonomy, and the ticket and
//! classification types shared by every other crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::TriageConfig;
pub use error::{Result, TriageError};
pub use types::*;
