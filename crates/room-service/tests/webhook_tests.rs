//! Webhook reconciliation integration tests.
//!
//! Feeds media server events through `WebhookReconciler` and checks the
//! stored state converges with what clients did through the API:
//! - participant_joined / participant_left drive presence
//! - duplicate and stale deliveries are acknowledged without change
//! - participants the room does not admit are evicted from the transport
//! - room_started / room_finished drive the room lifecycle

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use chrono::Duration;
use room_service::errors::RoomError;
use room_service::models::{ParticipantStatus, Room, RoomStatus, RoomType};
use room_service::services::media::mock::MediaCall;
use room_service::services::{Clock, ReconcileOutcome, WebhookPayload, WebhookReconciler};
use room_test_utils::*;

fn reconciler(fixture: &CoordinatorFixture) -> WebhookReconciler {
    WebhookReconciler::new(fixture.coordinator.clone())
}

fn payload(body: Vec<u8>) -> WebhookPayload {
    WebhookPayload::parse(&body).unwrap()
}

fn joined(room: &Room, user: &room_service::models::Caller) -> WebhookPayload {
    payload(
        WebhookBuilder::event("participant_joined")
            .room(&room.external_room_ref)
            .participant(&user.user_id.identity())
            .build(),
    )
}

fn left(room: &Room, user: &room_service::models::Caller) -> WebhookPayload {
    payload(
        WebhookBuilder::event("participant_left")
            .room(&room.external_room_ref)
            .participant(&user.user_id.identity())
            .build(),
    )
}

#[tokio::test]
async fn test_participant_joined_moves_invited_record_to_joined() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Private).await;
    fixture.invite(&room, &alice(), &[&bob()]).await;
    fixture.coordinator.accept_invitation(room.id, &bob()).await?;

    let outcome = reconciler(&fixture).reconcile(&joined(&room, &bob())).await?;
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let stored = fixture.room(&room).await;
    assert_eq!(stored.status, RoomStatus::Active);
    assert_eq!(stored.current_participants, 1);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_join_is_acknowledged_once() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Public).await;
    fixture.coordinator.join_room(room.id, &bob()).await?;

    let reconciler = reconciler(&fixture);
    let first = reconciler.reconcile(&joined(&room, &bob())).await?;
    let second = reconciler.reconcile(&joined(&room, &bob())).await?;

    assert_eq!(first, ReconcileOutcome::Ignored("already_joined"));
    assert_eq!(second, ReconcileOutcome::Ignored("already_joined"));
    assert_eq!(fixture.room(&room).await.current_participants, 1);
    Ok(())
}

#[tokio::test]
async fn test_participant_left_after_client_leave_is_idempotent() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Public).await;
    fixture.coordinator.join_room(room.id, &alice()).await?;
    fixture.coordinator.join_room(room.id, &bob()).await?;

    let reconciler = reconciler(&fixture);
    assert_eq!(
        reconciler.reconcile(&left(&room, &bob())).await?,
        ReconcileOutcome::Applied
    );
    assert_eq!(
        reconciler.reconcile(&left(&room, &bob())).await?,
        ReconcileOutcome::Ignored("already_left")
    );

    let stored = fixture.room(&room).await;
    assert_eq!(stored.current_participants, 1);
    assert_eq!(stored.status, RoomStatus::Active);
    Ok(())
}

#[tokio::test]
async fn test_last_participant_left_event_ends_room() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Public).await;
    fixture.coordinator.join_room(room.id, &alice()).await?;

    reconciler(&fixture).reconcile(&left(&room, &alice())).await?;
    assert_eq!(fixture.room(&room).await.status, RoomStatus::Ended);
    Ok(())
}

#[tokio::test]
async fn test_stale_join_after_leave_is_ignored() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Public).await;
    fixture.coordinator.join_room(room.id, &alice()).await?;
    fixture.coordinator.join_room(room.id, &bob()).await?;

    let joined_at = fixture.clock.now().timestamp();
    fixture.clock.advance(Duration::seconds(30));
    fixture.coordinator.leave_room(room.id, TEST_USER_BOB).await?;

    // Delivered late: the join happened before the leave.
    let late = payload(
        WebhookBuilder::event("participant_joined")
            .room(&room.external_room_ref)
            .participant(&TEST_USER_BOB.identity())
            .created_at(joined_at)
            .build(),
    );
    let outcome = reconciler(&fixture).reconcile(&late).await?;
    assert_eq!(outcome, ReconcileOutcome::Ignored("stale_event"));
    assert_eq!(fixture.room(&room).await.current_participants, 1);
    Ok(())
}

#[tokio::test]
async fn test_fresh_join_after_leave_rejoins() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Public).await;
    fixture.coordinator.join_room(room.id, &alice()).await?;
    fixture.coordinator.join_room(room.id, &bob()).await?;
    fixture.coordinator.leave_room(room.id, TEST_USER_BOB).await?;

    fixture.clock.advance(Duration::seconds(30));
    let fresh = payload(
        WebhookBuilder::event("participant_joined")
            .room(&room.external_room_ref)
            .participant(&TEST_USER_BOB.identity())
            .created_at(fixture.clock.now().timestamp())
            .build(),
    );
    let outcome = reconciler(&fixture).reconcile(&fresh).await?;
    assert_eq!(outcome, ReconcileOutcome::Applied);
    assert_eq!(fixture.room(&room).await.current_participants, 2);
    Ok(())
}

#[tokio::test]
async fn test_join_in_same_second_as_leave_rejoins() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Public).await;
    fixture.coordinator.join_room(room.id, &alice()).await?;
    fixture.coordinator.join_room(room.id, &bob()).await?;

    fixture.clock.advance(Duration::milliseconds(400));
    fixture.coordinator.leave_room(room.id, TEST_USER_BOB).await?;

    // Reconnected 200ms later; createdAt only carries the whole second.
    fixture.clock.advance(Duration::milliseconds(200));
    let reconnect = payload(
        WebhookBuilder::event("participant_joined")
            .room(&room.external_room_ref)
            .participant(&TEST_USER_BOB.identity())
            .created_at(fixture.clock.now().timestamp())
            .build(),
    );
    let outcome = reconciler(&fixture).reconcile(&reconnect).await?;
    assert_eq!(outcome, ReconcileOutcome::Applied);
    assert_eq!(fixture.room(&room).await.current_participants, 2);
    Ok(())
}

#[tokio::test]
async fn test_unknown_participant_is_evicted() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Private).await;

    let outcome = reconciler(&fixture).reconcile(&joined(&room, &charlie())).await?;
    assert_eq!(outcome, ReconcileOutcome::Ignored("participant_not_found"));
    assert!(fixture.media.calls().contains(&MediaCall::RemoveParticipant {
        room: room.external_room_ref.clone(),
        identity: TEST_USER_CHARLIE.identity(),
    }));
    assert_eq!(fixture.room(&room).await.current_participants, 0);
    Ok(())
}

#[tokio::test]
async fn test_waiting_participant_on_transport_is_evicted() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture
        .create_room_with(
            &alice(),
            RoomRequestBuilder::new(RoomType::Public)
                .waiting_room()
                .build(),
        )
        .await;
    let waiting = fixture.coordinator.join_room(room.id, &bob()).await?;
    assert_eq!(waiting.participant.status, ParticipantStatus::Waiting);

    let outcome = reconciler(&fixture).reconcile(&joined(&room, &bob())).await?;
    assert_eq!(outcome, ReconcileOutcome::Ignored("participant_refused"));

    let waiting_now = fixture
        .coordinator
        .list_participants(room.id, Some(ParticipantStatus::Waiting))
        .await?;
    assert_eq!(waiting_now.len(), 1, "the webhook does not bypass the waiting room");
    Ok(())
}

#[tokio::test]
async fn test_egress_and_malformed_identities_are_ignored() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Public).await;
    let reconciler = reconciler(&fixture);

    let egress = payload(
        WebhookBuilder::event("participant_joined")
            .room(&room.external_room_ref)
            .participant_of_kind("EG_recorder", "EGRESS")
            .build(),
    );
    assert_eq!(
        reconciler.reconcile(&egress).await?,
        ReconcileOutcome::Ignored("egress_participant")
    );

    let malformed = payload(
        WebhookBuilder::event("participant_joined")
            .room(&room.external_room_ref)
            .participant("not-a-user")
            .build(),
    );
    assert_eq!(
        reconciler.reconcile(&malformed).await?,
        ReconcileOutcome::Ignored("unknown_identity")
    );
    assert_eq!(fixture.media.call_count(), 1, "only the create call");
    Ok(())
}

#[tokio::test]
async fn test_unknown_room_and_event_are_ignored() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let reconciler = reconciler(&fixture);

    let unknown_room = payload(
        WebhookBuilder::event("room_started")
            .room("no-such-room")
            .build(),
    );
    assert_eq!(
        reconciler.reconcile(&unknown_room).await?,
        ReconcileOutcome::Ignored("unknown_room")
    );

    let unhandled = payload(WebhookBuilder::event("track_published").build());
    assert_eq!(
        reconciler.reconcile(&unhandled).await?,
        ReconcileOutcome::Ignored("unhandled_event")
    );
    Ok(())
}

#[tokio::test]
async fn test_room_started_and_finished_drive_lifecycle() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Public).await;
    let reconciler = reconciler(&fixture);

    let started = payload(
        WebhookBuilder::event("room_started")
            .room(&room.external_room_ref)
            .build(),
    );
    assert_eq!(reconciler.reconcile(&started).await?, ReconcileOutcome::Applied);
    assert_eq!(fixture.room(&room).await.status, RoomStatus::Active);
    assert_eq!(
        reconciler.reconcile(&started).await?,
        ReconcileOutcome::Ignored("already_active")
    );

    let finished = payload(
        WebhookBuilder::event("room_finished")
            .room(&room.external_room_ref)
            .build(),
    );
    assert_eq!(reconciler.reconcile(&finished).await?, ReconcileOutcome::Applied);
    assert_eq!(fixture.room(&room).await.status, RoomStatus::Ended);
    assert_eq!(
        reconciler.reconcile(&finished).await?,
        ReconcileOutcome::Ignored("room_terminal")
    );
    Ok(())
}

#[tokio::test]
async fn test_join_event_for_ended_room_evicts() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Public).await;
    fixture.coordinator.join_room(room.id, &bob()).await?;
    fixture.coordinator.end_room(room.id, TEST_USER_ALICE).await?;

    let outcome = reconciler(&fixture).reconcile(&joined(&room, &bob())).await?;
    assert_eq!(outcome, ReconcileOutcome::Ignored("room_ended"));
    Ok(())
}

#[tokio::test]
async fn test_client_and_webhook_paths_converge() -> Result<()> {
    let fixture = CoordinatorFixture::new();
    let room = fixture.create_room(&alice(), RoomType::Public).await;
    let reconciler = reconciler(&fixture);

    // Client join, then the media server reports the same join.
    fixture.coordinator.join_room(room.id, &alice()).await?;
    reconciler.reconcile(&joined(&room, &alice())).await?;
    fixture.coordinator.join_room(room.id, &bob()).await?;
    reconciler.reconcile(&joined(&room, &bob())).await?;

    // Webhook leave, then the client leave arrives late.
    reconciler.reconcile(&left(&room, &bob())).await?;
    let late = fixture.coordinator.leave_room(room.id, TEST_USER_BOB).await;
    assert!(matches!(late, Err(RoomError::AlreadyLeft)));

    let stored = fixture.room(&room).await;
    assert_eq!(stored.current_participants, 1);
    assert_eq!(stored.status, RoomStatus::Active);
    Ok(())
}
