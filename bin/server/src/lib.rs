//! HTTP surface of the GPU console.
//!
//! Exposes login, logout and the session snapshot, plus the permission
//! checks the console front end needs: the filtered menu, page checks and
//! per-resource checks. Every check refreshes an expired session first.

pub mod config;
pub mod error;
pub mod routes;

pub use routes::{AppState, router};
