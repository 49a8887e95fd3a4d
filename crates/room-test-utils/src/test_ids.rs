//! Fixed test IDs for deterministic tests
//!
//! All test IDs are deterministic to ensure reproducible test results.

use common::types::{RoomId, UserId};
use uuid::Uuid;

// User IDs (100-199)
pub const TEST_USER_ALICE: UserId = UserId(Uuid::from_u128(100));
pub const TEST_USER_BOB: UserId = UserId(Uuid::from_u128(101));
pub const TEST_USER_CHARLIE: UserId = UserId(Uuid::from_u128(102));
pub const TEST_USER_DAVE: UserId = UserId(Uuid::from_u128(103));

// Room IDs (1000-1099)
pub const TEST_ROOM_UNKNOWN: RoomId = RoomId(Uuid::from_u128(1000));

// Emails
pub const TEST_EMAIL_ALICE: &str = "alice@example.com";
pub const TEST_EMAIL_BOB: &str = "bob@example.com";
pub const TEST_EMAIL_CHARLIE: &str = "charlie@example.com";
pub const TEST_EMAIL_DAVE: &str = "dave@example.com";

// Secrets and media credentials
pub const TEST_AUTH_JWT_SECRET: &str = "test-user-token-secret-do-not-use-in-production";
pub const TEST_LIVEKIT_API_KEY: &str = "devkey";
pub const TEST_LIVEKIT_API_SECRET: &str = "test-livekit-secret-do-not-use-in-production";
