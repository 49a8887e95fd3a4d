//! Strongly-typed identifiers shared by the room session crates.
//!
//! Each identifier wraps a [`Uuid`] so that a room id can never be passed
//! where a participant id or user id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix accepted in front of a user id when it is used as a media identity.
pub const USER_IDENTITY_PREFIX: &str = "user:";

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Access the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_newtype!(
    /// Unique identifier for a room.
    RoomId
);

uuid_newtype!(
    /// Unique identifier for a participant record within a room.
    ParticipantId
);

uuid_newtype!(
    /// Unique identifier for an authenticated user account.
    UserId
);

impl UserId {
    /// Parse a media-transport identity back into a user id.
    ///
    /// Accepts either a bare UUID or a `user:`-prefixed UUID. Returns `None`
    /// for anything else (recording bots, malformed identities).
    #[must_use]
    pub fn from_identity(identity: &str) -> Option<Self> {
        let raw = identity
            .strip_prefix(USER_IDENTITY_PREFIX)
            .unwrap_or(identity)
            .trim();
        Uuid::parse_str(raw).ok().map(Self)
    }

    /// The identity string used for this user on the media transport.
    #[must_use]
    pub fn identity(&self) -> String {
        self.0.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct_types_with_same_display() {
        let uuid = Uuid::from_u128(42);
        let room = RoomId(uuid);
        let user = UserId(uuid);
        assert_eq!(room.to_string(), user.to_string());
    }

    #[test]
    fn test_from_str_roundtrip() {
        let id = ParticipantId::new();
        let parsed: ParticipantId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_from_str_rejects_garbage() {
        assert!("not-a-uuid".parse::<RoomId>().is_err());
    }

    #[test]
    fn test_user_from_bare_identity() {
        let id = UserId(Uuid::from_u128(100));
        assert_eq!(UserId::from_identity(&id.identity()), Some(id));
    }

    #[test]
    fn test_user_from_prefixed_identity() {
        let id = UserId(Uuid::from_u128(100));
        let identity = format!("user:{id}");
        assert_eq!(UserId::from_identity(&identity), Some(id));
    }

    #[test]
    fn test_user_from_egress_identity_is_none() {
        assert_eq!(UserId::from_identity("EG_abc123"), None);
        assert_eq!(UserId::from_identity(""), None);
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = RoomId(Uuid::from_u128(7));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", Uuid::from_u128(7)));
    }
}
