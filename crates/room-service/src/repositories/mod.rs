//! Repository layer for the room service.
//!
//! `RoomStore` and `ParticipantStore` are the read/CRUD seams. `SessionStore`
//! adds the multi-row transitions the coordinator needs; each of its methods
//! is one atomic unit (a transaction holding the room row lock in Postgres,
//! one mutex section in memory).
//!
//! Participant updates are compare-and-set on the prior status: a method
//! returns `Stale`/`JoinCommit::Stale` when another writer got there first,
//! and the coordinator re-reads and retries.

pub mod memory;
pub mod participants;
pub mod rooms;
pub mod session;

use crate::errors::RoomError;
use crate::models::{Participant, ParticipantStatus, Room, RoomFilter, RoomPage, RoomStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, RoomId, UserId};

pub use memory::MemorySessionStore;
pub use session::PgSessionStore;

/// Room lookups and listing.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>, RoomError>;

    async fn find_room_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Room>, RoomError>;

    async fn list_rooms(&self, filter: &RoomFilter) -> Result<RoomPage, RoomError>;

    /// Record the media server's id for a room.
    async fn set_external_sid(&self, room_id: RoomId, sid: &str) -> Result<(), RoomError>;
}

/// Participant lookups.
#[async_trait]
pub trait ParticipantStore: Send + Sync {
    async fn get_participant(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Option<Participant>, RoomError>;

    /// The record bound to `user_id` in `room_id`.
    async fn find_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Participant>, RoomError>;

    /// The email invitation for `email` in `room_id`, bound or not.
    async fn find_invitation_by_email(
        &self,
        room_id: RoomId,
        email: &str,
    ) -> Result<Option<Participant>, RoomError>;

    /// Participants of a room, optionally restricted to one status, oldest first.
    async fn list_participants(
        &self,
        room_id: RoomId,
        status: Option<ParticipantStatus>,
    ) -> Result<Vec<Participant>, RoomError>;

    /// Pending invitations addressed to `email` across all rooms.
    async fn list_invitations_for_email(&self, email: &str)
        -> Result<Vec<Participant>, RoomError>;
}

/// Result of a compare-and-set write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The guarded row no longer matched the expected state.
    Stale,
}

/// A participant landing in `invited`, `waiting` or `joined`.
#[derive(Debug, Clone)]
pub struct JoinPlan {
    /// The record as it should look after the commit.
    pub participant: Participant,
    /// Prior status guard. `None` inserts a new record.
    pub expected: Option<ParticipantStatus>,
    /// A stale record of the same user to delete in the same unit.
    pub supersedes: Option<ParticipantId>,
    pub at: DateTime<Utc>,
}

impl JoinPlan {
    /// Whether this commit takes a seat (and so bumps the counter).
    pub fn occupies_slot(&self) -> bool {
        self.participant.status == ParticipantStatus::Joined
            && self.expected != Some(ParticipantStatus::Joined)
    }
}

#[derive(Debug, Clone)]
pub enum JoinCommit {
    /// Committed. Carries the room after the commit.
    Applied(Room),
    RoomFull,
    RoomEnded,
    Stale,
}

/// A participant leaving presence: `left`, `denied` or `removed`.
#[derive(Debug, Clone)]
pub struct DeparturePlan {
    pub participant_id: ParticipantId,
    pub expected: ParticipantStatus,
    pub status: ParticipantStatus,
    pub removed_by: Option<UserId>,
    pub reason: Option<String>,
    /// End an active room whose joined count drops to zero.
    pub end_if_empty: bool,
    /// When the departing participant is the joined host, hand the role to
    /// the longest-present remaining participant in the same unit.
    pub promote_successor: bool,
    pub at: DateTime<Utc>,
}

impl DeparturePlan {
    pub fn leave(participant: &Participant, at: DateTime<Utc>) -> Self {
        Self {
            participant_id: participant.id,
            expected: participant.status,
            status: ParticipantStatus::Left,
            removed_by: None,
            reason: None,
            end_if_empty: true,
            promote_successor: true,
            at,
        }
    }

    pub fn frees_slot(&self) -> bool {
        self.expected == ParticipantStatus::Joined
    }

    /// Apply the departure to a participant record.
    pub fn apply(&self, participant: &mut Participant) {
        participant.status = self.status;
        participant.left_at = Some(self.at);
        participant.updated_at = self.at;
        if matches!(
            self.status,
            ParticipantStatus::Denied | ParticipantStatus::Removed
        ) {
            participant.is_removed = true;
            participant.removed_by = self.removed_by;
            participant.removal_reason = self.reason.clone();
        }
    }
}

#[derive(Debug, Clone)]
pub enum DepartureCommit {
    Applied {
        room: Room,
        /// Joined participants left after the commit.
        remaining: i64,
        /// Whether the room was ended in the same unit.
        ended: bool,
        /// Who took over as host in the same unit.
        new_host: Option<UserId>,
    },
    Stale,
}

/// Earliest-joined remaining participant, lowest id on ties.
pub(crate) fn select_successor<'a>(
    joined: impl IntoIterator<Item = &'a Participant>,
    departed: UserId,
) -> Option<&'a Participant> {
    joined
        .into_iter()
        .filter(|p| p.is_joined() && p.user_id.is_some() && p.user_id != Some(departed))
        .min_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)))
}

/// Atomic move of the host role.
#[derive(Debug, Clone)]
pub struct HostSwap {
    pub room_id: RoomId,
    /// Guard on `Room.host_id`.
    pub expected_host: UserId,
    /// Current host record to demote, when there is one.
    pub demote: Option<ParticipantId>,
    /// Joined participant to promote.
    pub promote: ParticipantId,
    pub new_host: UserId,
    pub at: DateTime<Utc>,
}

/// Atomic multi-row transitions.
#[async_trait]
pub trait SessionStore: RoomStore + ParticipantStore {
    /// Connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), RoomError>;

    /// Persist a new room together with its host invitation.
    async fn create_room(&self, room: &Room, host: &Participant) -> Result<(), RoomError>;

    /// Insert a record that does not take a seat. `Stale` on a uniqueness clash.
    async fn insert_participant(&self, participant: &Participant)
        -> Result<WriteOutcome, RoomError>;

    /// Overwrite a record that does not change seat occupancy.
    async fn update_participant(
        &self,
        participant: &Participant,
        expected: ParticipantStatus,
    ) -> Result<WriteOutcome, RoomError>;

    async fn delete_participant(
        &self,
        participant_id: ParticipantId,
        expected: ParticipantStatus,
    ) -> Result<WriteOutcome, RoomError>;

    /// Commit a join or admission, enforcing capacity and lifecycle under the room lock.
    async fn commit_join(&self, plan: &JoinPlan) -> Result<JoinCommit, RoomError>;

    /// Commit a departure, freeing the seat, passing on the host role and
    /// optionally ending an emptied room.
    async fn commit_departure(&self, plan: &DeparturePlan) -> Result<DepartureCommit, RoomError>;

    async fn swap_host(&self, swap: &HostSwap) -> Result<WriteOutcome, RoomError>;

    /// Compare-and-set the room status. `None` when the room was not in `from`.
    async fn transition_room(
        &self,
        room_id: RoomId,
        from: RoomStatus,
        to: RoomStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Room>, RoomError>;

    /// End a room: status ended, counter zero, joined and waiting marked left.
    /// `None` when the room was already terminal.
    async fn end_room(&self, room_id: RoomId, at: DateTime<Utc>)
        -> Result<Option<Room>, RoomError>;
}
