//! PostgreSQL session store tests.
//!
//! Each test gets a fresh database with the workspace migrations applied.
//! Run with `cargo test -- --ignored` and `DATABASE_URL` set.
//!
//! - capacity and lifecycle are enforced under the room lock
//! - uniqueness clashes surface as `Stale`, never as errors
//! - departures free seats and end emptied rooms
//! - host swaps keep exactly one joined host

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Utc;
use common::types::{RoomId, UserId};
use futures::future::join_all;
use room_service::models::{
    Participant, ParticipantRole, ParticipantStatus, Room, RoomFilter, RoomStatus, RoomType,
};
use room_service::repositories::{
    DepartureCommit, DeparturePlan, HostSwap, JoinCommit, JoinPlan, ParticipantStore,
    PgSessionStore, RoomStore, SessionStore, WriteOutcome,
};
use sqlx::PgPool;
use uuid::Uuid;

const HOST: u128 = 100;

fn user(n: u128) -> UserId {
    UserId(Uuid::from_u128(n))
}

fn room(max: i32) -> Room {
    let now = Utc::now();
    let id = RoomId::new();
    Room {
        id,
        name: "Design review".to_string(),
        description: Some("weekly".to_string()),
        host_id: user(HOST),
        room_type: RoomType::Public,
        status: RoomStatus::Scheduled,
        max_participants: max,
        current_participants: 0,
        scheduled_start_time: None,
        scheduled_end_time: None,
        external_room_ref: id.to_string(),
        external_room_sid: None,
        tags: vec!["design".to_string()],
        waiting_room_enabled: false,
        recording_enabled: false,
        created_at: now,
        updated_at: now,
        started_at: None,
        ended_at: None,
    }
}

fn host_invite(room: &Room) -> Participant {
    Participant::new_for_user(
        room.id,
        room.host_id,
        ParticipantRole::Host,
        ParticipantStatus::Invited,
        Utc::now(),
    )
}

fn join_plan(room: &Room, n: u128) -> JoinPlan {
    let now = Utc::now();
    let mut participant = Participant::new_for_user(
        room.id,
        user(n),
        ParticipantRole::Participant,
        ParticipantStatus::Joined,
        now,
    );
    participant.mark_joined(now);
    JoinPlan {
        participant,
        expected: None,
        supersedes: None,
        at: now,
    }
}

async fn seeded(pool: PgPool, max: i32) -> (PgSessionStore, Room) {
    let store = PgSessionStore::new(pool);
    let room = room(max);
    store.create_room(&room, &host_invite(&room)).await.unwrap();
    (store, room)
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_create_room_round_trips(pool: PgPool) {
    let (store, room) = seeded(pool, 5).await;

    let stored = store.get_room(room.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Design review");
    assert_eq!(stored.status, RoomStatus::Scheduled);
    assert_eq!(stored.tags, vec!["design".to_string()]);

    let by_ref = store
        .find_room_by_external_ref(&room.external_room_ref)
        .await
        .unwrap();
    assert_eq!(by_ref.map(|r| r.id), Some(room.id));

    let host = store.find_participant(room.id, user(HOST)).await.unwrap().unwrap();
    assert_eq!(host.role, ParticipantRole::Host);
    assert_eq!(host.status, ParticipantStatus::Invited);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_commit_join_activates_room(pool: PgPool) {
    let (store, room) = seeded(pool, 5).await;

    let commit = store.commit_join(&join_plan(&room, 200)).await.unwrap();
    let JoinCommit::Applied(after) = commit else {
        panic!("expected applied commit, got {commit:?}");
    };
    assert_eq!(after.status, RoomStatus::Active);
    assert_eq!(after.current_participants, 1);
    assert!(after.started_at.is_some());
    let joined = store
        .list_participants(room.id, Some(ParticipantStatus::Joined))
        .await
        .unwrap();
    assert_eq!(joined.len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_joins_never_exceed_capacity(pool: PgPool) {
    let (store, room) = seeded(pool, 3).await;

    let plans: Vec<JoinPlan> = (200..210).map(|n| join_plan(&room, n)).collect();
    let commits = join_all(plans.iter().map(|plan| store.commit_join(plan))).await;

    let applied = commits
        .iter()
        .filter(|c| matches!(c, Ok(JoinCommit::Applied(_))))
        .count();
    let full = commits
        .iter()
        .filter(|c| matches!(c, Ok(JoinCommit::RoomFull)))
        .count();
    assert_eq!(applied, 3);
    assert_eq!(full, 7);

    let stored = store.get_room(room.id).await.unwrap().unwrap();
    assert_eq!(stored.current_participants, 3);
    let joined = store
        .list_participants(room.id, Some(ParticipantStatus::Joined))
        .await
        .unwrap();
    assert_eq!(joined.len(), 3);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_duplicate_user_is_stale(pool: PgPool) {
    let (store, room) = seeded(pool, 5).await;

    store.commit_join(&join_plan(&room, 200)).await.unwrap();
    let again = store.commit_join(&join_plan(&room, 200)).await.unwrap();

    assert!(matches!(again, JoinCommit::Stale));
    let stored = store.get_room(room.id).await.unwrap().unwrap();
    assert_eq!(stored.current_participants, 1);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_join_into_ended_room_is_refused(pool: PgPool) {
    let (store, room) = seeded(pool, 5).await;
    store.end_room(room.id, Utc::now()).await.unwrap();

    let commit = store.commit_join(&join_plan(&room, 200)).await.unwrap();
    assert!(matches!(commit, JoinCommit::RoomEnded));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_last_departure_ends_room(pool: PgPool) {
    let (store, room) = seeded(pool, 5).await;
    let first = join_plan(&room, 200);
    let second = join_plan(&room, 201);
    store.commit_join(&first).await.unwrap();
    store.commit_join(&second).await.unwrap();

    let commit = store
        .commit_departure(&DeparturePlan::leave(&first.participant, Utc::now()))
        .await
        .unwrap();
    let DepartureCommit::Applied {
        room: after,
        remaining,
        ended,
        ..
    } = commit
    else {
        panic!("expected applied departure");
    };
    assert_eq!(remaining, 1);
    assert!(!ended);
    assert_eq!(after.current_participants, 1);

    let commit = store
        .commit_departure(&DeparturePlan::leave(&second.participant, Utc::now()))
        .await
        .unwrap();
    let DepartureCommit::Applied { room: after, ended, .. } = commit else {
        panic!("expected applied departure");
    };
    assert!(ended);
    assert_eq!(after.status, RoomStatus::Ended);
    assert_eq!(after.current_participants, 0);

    // A repeated leave no longer matches the expected status.
    let repeat = store
        .commit_departure(&DeparturePlan::leave(&second.participant, Utc::now()))
        .await
        .unwrap();
    assert!(matches!(repeat, DepartureCommit::Stale));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_removal_records_actor_and_reason(pool: PgPool) {
    let (store, room) = seeded(pool, 5).await;
    let plan = join_plan(&room, 200);
    store.commit_join(&plan).await.unwrap();

    let removal = DeparturePlan {
        participant_id: plan.participant.id,
        expected: ParticipantStatus::Joined,
        status: ParticipantStatus::Removed,
        removed_by: Some(user(HOST)),
        reason: Some("disruptive".to_string()),
        end_if_empty: false,
        promote_successor: false,
        at: Utc::now(),
    };
    store.commit_departure(&removal).await.unwrap();

    let stored = store
        .get_participant(plan.participant.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ParticipantStatus::Removed);
    assert!(stored.is_removed);
    assert_eq!(stored.removed_by, Some(user(HOST)));
    assert_eq!(stored.removal_reason.as_deref(), Some("disruptive"));

    let after = store.get_room(room.id).await.unwrap().unwrap();
    assert_eq!(after.status, RoomStatus::Active, "end_if_empty was off");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_swap_host_moves_role(pool: PgPool) {
    let (store, room) = seeded(pool, 5).await;
    let host = store.find_participant(room.id, user(HOST)).await.unwrap().unwrap();

    let mut host_join = join_plan(&room, HOST);
    host_join.participant = host.clone();
    host_join.participant.mark_joined(Utc::now());
    host_join.expected = Some(ParticipantStatus::Invited);
    store.commit_join(&host_join).await.unwrap();

    let guest = join_plan(&room, 200);
    store.commit_join(&guest).await.unwrap();

    let swap = HostSwap {
        room_id: room.id,
        expected_host: user(HOST),
        demote: Some(host.id),
        promote: guest.participant.id,
        new_host: user(200),
        at: Utc::now(),
    };
    assert_eq!(store.swap_host(&swap).await.unwrap(), WriteOutcome::Applied);

    let after = store.get_room(room.id).await.unwrap().unwrap();
    assert_eq!(after.host_id, user(200));
    let promoted = store
        .get_participant(guest.participant.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promoted.role, ParticipantRole::Host);
    let demoted = store.get_participant(host.id).await.unwrap().unwrap();
    assert_eq!(demoted.role, ParticipantRole::Participant);

    // The guard on the old host now fails.
    assert_eq!(store.swap_host(&swap).await.unwrap(), WriteOutcome::Stale);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_host_departure_promotes_successor_in_same_commit(pool: PgPool) {
    let (store, room) = seeded(pool, 5).await;
    let host = store.find_participant(room.id, user(HOST)).await.unwrap().unwrap();

    let mut host_join = join_plan(&room, HOST);
    host_join.participant = host.clone();
    host_join.participant.mark_joined(Utc::now());
    host_join.expected = Some(ParticipantStatus::Invited);
    store.commit_join(&host_join).await.unwrap();
    let first = join_plan(&room, 200);
    store.commit_join(&first).await.unwrap();
    store.commit_join(&join_plan(&room, 201)).await.unwrap();

    let commit = store
        .commit_departure(&DeparturePlan::leave(&host_join.participant, Utc::now()))
        .await
        .unwrap();
    let DepartureCommit::Applied {
        room: after,
        new_host,
        ended,
        ..
    } = commit
    else {
        panic!("expected applied departure");
    };

    assert!(!ended);
    assert_eq!(new_host, Some(user(200)));
    assert_eq!(after.host_id, user(200));
    assert_eq!(after.status, RoomStatus::Active);
    let promoted = store
        .get_participant(first.participant.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promoted.role, ParticipantRole::Host);
    let departed = store.get_participant(host.id).await.unwrap().unwrap();
    assert_eq!(departed.role, ParticipantRole::Participant);
    assert_eq!(departed.status, ParticipantStatus::Left);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_transition_and_end_are_compare_and_set(pool: PgPool) {
    let (store, room) = seeded(pool, 5).await;
    let now = Utc::now();

    let active = store
        .transition_room(room.id, RoomStatus::Scheduled, RoomStatus::Active, now)
        .await
        .unwrap();
    assert_eq!(active.map(|r| r.status), Some(RoomStatus::Active));

    let again = store
        .transition_room(room.id, RoomStatus::Scheduled, RoomStatus::Active, now)
        .await
        .unwrap();
    assert!(again.is_none());

    let ended = store.end_room(room.id, now).await.unwrap();
    assert_eq!(ended.map(|r| r.status), Some(RoomStatus::Ended));
    assert!(store.end_room(room.id, now).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_list_rooms_filters(pool: PgPool) {
    let store = PgSessionStore::new(pool);
    for name in ["Alpha sync", "Beta review", "Alpha retro"] {
        let mut r = room(5);
        r.name = name.to_string();
        store.create_room(&r, &host_invite(&r)).await.unwrap();
    }

    let filter = RoomFilter {
        search: Some("ALPHA".to_string()),
        ..RoomFilter::default()
    };
    let page = store.list_rooms(&filter).await.unwrap();
    assert_eq!(page.total, 2);
    assert!(page.rooms.iter().all(|r| r.name.starts_with("Alpha")));

    let filter = RoomFilter {
        status: Some(RoomStatus::Active),
        ..RoomFilter::default()
    };
    assert_eq!(store.list_rooms(&filter).await.unwrap().total, 0);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_ping(pool: PgPool) {
    let store = PgSessionStore::new(pool);
    store.ping().await.unwrap();
}
