//! Core types for the policy subsystem
//!
//! This module provides the fundamental types used throughout the crate:
//! - `AuthContext` - Identity, correlation id and cancellation for a check
//! - `PolicyError` / `Denial` - Error types

pub mod context;
pub mod error;

pub use context::AuthContext;
pub use error::{Denial, DenialReason, PolicyError, PolicyResult};
