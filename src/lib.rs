//! Taskmill — offline-first distribution of discrete work to many
//! independent, possibly-offline workers.
//!
//! The server half assigns tasks (soft leases, first result wins) and
//! reconciles submitted results; the client half mirrors everything in a
//! durable local cache so work continues through disconnects and results
//! are never lost.

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod server;
pub mod store;
