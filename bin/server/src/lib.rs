//! Travel concierge HTTP service.
//!
//! Wires the dialog engine to PostgreSQL checkpoints and to the remote model,
//! tool and traveller-directory backends, and exposes conversations over
//! axum.

pub mod config;
pub mod db;
pub mod error;
pub mod remote;
pub mod routes;
