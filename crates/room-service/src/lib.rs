//! Room Session Service Library
//!
//! Room lifecycle and participant admission for a video-conferencing
//! backend. Two writers change room state: client requests and media server
//! webhooks. Both go through [`services::SessionCoordinator`], which keeps
//! the host, participant count and lifecycle invariants.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/coordinator.rs -> repositories/*.rs
//!                                                          \-> services/media.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - user token validation and webhook signature verification
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - auth and HTTP metrics middleware
//! - `models` - Rooms, participants and request/response bodies
//! - `observability` - Prometheus metrics
//! - `repositories` - Postgres and in-memory session stores
//! - `routes` - Axum router setup
//! - `services` - coordinator, access policy, media adapter, webhook reconciler

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
