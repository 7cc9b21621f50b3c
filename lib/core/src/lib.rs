//! Core types and utilities for the GPU cluster console.
//!
//! This crate provides the foundational identifiers, the injectable clock and
//! the error-handling alias shared by the access-control crates.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Result;
pub use id::{ParseIdError, SessionId, UserId};
