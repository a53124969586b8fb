//! HTTP server — task assignment, payload delivery, and result intake.

pub mod assign;
pub mod files;
pub mod routes;

pub use routes::{AppState, router};
