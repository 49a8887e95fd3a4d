//! Types and helpers shared across the room session crates.

#![warn(clippy::pedantic)]

/// Strongly-typed identifiers
pub mod types;

/// Secret types that prevent accidental logging
pub mod secret;

/// JWT size/iat checks and user token claims
pub mod jwt;
