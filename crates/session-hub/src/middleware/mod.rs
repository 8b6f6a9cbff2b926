//! Middleware for the session hub.
//!
//! # Components
//!
//! - `identity` - Requires the host-supplied caller identity on API routes

pub mod identity;

pub use identity::{require_caller, CallerId, IdentityState};
