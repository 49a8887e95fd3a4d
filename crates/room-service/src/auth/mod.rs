//! Authentication for the room service.
//!
//! # Components
//!
//! - `user_token` - validates end-user Bearer tokens into a [`Caller`]
//! - `webhook` - verifies signed media server webhook deliveries
//!
//! [`Caller`]: crate::models::Caller

pub mod user_token;
pub mod webhook;

pub use user_token::UserTokenValidator;
pub use webhook::WebhookVerifier;
