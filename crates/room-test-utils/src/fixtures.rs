//! Coordinator fixtures
//!
//! A [`SessionCoordinator`] wired to the in-memory store, the mock media
//! server and a manual clock, plus canned callers and room requests.

use crate::test_ids::*;
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::types::UserId;
use room_service::models::{Caller, CreateRoomRequest, Room, RoomType};
use room_service::repositories::MemorySessionStore;
use room_service::services::media::mock::MockMediaInfrastructure;
use room_service::services::{CoordinatorSettings, ManualClock, SessionCoordinator};
use std::sync::Arc;

/// Fixed start time for the manual clock.
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap()
}

pub fn alice() -> Caller {
    Caller::new(TEST_USER_ALICE)
        .with_email(TEST_EMAIL_ALICE)
        .with_display_name("Alice")
}

pub fn bob() -> Caller {
    Caller::new(TEST_USER_BOB)
        .with_email(TEST_EMAIL_BOB)
        .with_display_name("Bob")
}

pub fn charlie() -> Caller {
    Caller::new(TEST_USER_CHARLIE)
        .with_email(TEST_EMAIL_CHARLIE)
        .with_display_name("Charlie")
}

pub fn dave() -> Caller {
    Caller::new(TEST_USER_DAVE)
        .with_email(TEST_EMAIL_DAVE)
        .with_display_name("Dave")
}

/// A caller with a fresh random id and email.
pub fn random_caller() -> Caller {
    let user_id = UserId::new();
    Caller::new(user_id).with_email(format!("{}@example.com", user_id.0.simple()))
}

/// Builder for create-room requests.
///
/// # Example
/// ```rust,ignore
/// let request = RoomRequestBuilder::new(RoomType::Private)
///     .max_participants(3)
///     .waiting_room()
///     .build();
/// ```
pub struct RoomRequestBuilder {
    request: CreateRoomRequest,
}

impl RoomRequestBuilder {
    pub fn new(room_type: RoomType) -> Self {
        let scheduled_start_time =
            (room_type == RoomType::Scheduled).then(|| test_epoch() + Duration::hours(1));
        Self {
            request: CreateRoomRequest {
                name: format!("{} room", room_type.as_str()),
                description: None,
                room_type,
                max_participants: None,
                scheduled_start_time,
                scheduled_end_time: None,
                tags: Vec::new(),
                waiting_room_enabled: false,
                recording_enabled: false,
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.request.name = name.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.request.description = Some(description.to_string());
        self
    }

    pub fn max_participants(mut self, max: i32) -> Self {
        self.request.max_participants = Some(max);
        self
    }

    pub fn waiting_room(mut self) -> Self {
        self.request.waiting_room_enabled = true;
        self
    }

    pub fn recording(mut self) -> Self {
        self.request.recording_enabled = true;
        self
    }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.request.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn window(mut self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        self.request.scheduled_start_time = Some(start);
        self.request.scheduled_end_time = end;
        self
    }

    pub fn build(self) -> CreateRoomRequest {
        self.request
    }
}

/// Coordinator over in-memory collaborators the test can inspect and steer.
pub struct CoordinatorFixture {
    pub coordinator: SessionCoordinator,
    pub store: Arc<MemorySessionStore>,
    pub media: Arc<MockMediaInfrastructure>,
    pub clock: Arc<ManualClock>,
}

impl CoordinatorFixture {
    pub fn new() -> Self {
        Self::with_settings(CoordinatorSettings::default())
    }

    pub fn with_settings(settings: CoordinatorSettings) -> Self {
        let store = Arc::new(MemorySessionStore::new());
        let media = Arc::new(MockMediaInfrastructure::accepting());
        let clock = Arc::new(ManualClock::new(test_epoch()));
        let coordinator = SessionCoordinator::new(
            store.clone(),
            media.clone(),
            clock.clone(),
            settings,
        );
        Self {
            coordinator,
            store,
            media,
            clock,
        }
    }

    /// Create a room of `room_type` with default settings, hosted by `host`.
    pub async fn create_room(&self, host: &Caller, room_type: RoomType) -> Room {
        self.create_room_with(host, RoomRequestBuilder::new(room_type).build())
            .await
    }

    pub async fn create_room_with(&self, host: &Caller, request: CreateRoomRequest) -> Room {
        self.coordinator
            .create_room(host, request)
            .await
            .expect("room should be created")
    }

    /// Invite each caller by email and bind the invitation to their account.
    pub async fn invite(&self, room: &Room, host: &Caller, guests: &[&Caller]) {
        for guest in guests {
            let email = guest.email.as_deref().expect("guest needs an email");
            self.coordinator
                .invite_by_email(room.id, host.user_id, email)
                .await
                .expect("invitation should be sent");
        }
    }

    /// The room as currently stored.
    pub async fn room(&self, room: &Room) -> Room {
        self.coordinator
            .get_room(room.id)
            .await
            .expect("room should exist")
    }
}

impl Default for CoordinatorFixture {
    fn default() -> Self {
        Self::new()
    }
}
