//! # Room Test Utilities
//!
//! Shared test utilities for the room service.
//!
//! This crate provides:
//! - Fixed IDs for deterministic tests
//! - User token and signed webhook builders
//! - A coordinator fixture over the in-memory store, mock media server and
//!   manual clock
//! - Server test harness (`TestRoomServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let fixture = CoordinatorFixture::new();
//!     let room = fixture.create_room(&alice(), RoomType::Public).await;
//!
//!     let joined = fixture.coordinator.join_room(room.id, &bob()).await?;
//!     assert!(joined.access.is_some());
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use fixtures::*;
pub use server_harness::*;
pub use test_ids::*;
pub use token_builders::*;
